//! # Module Registration Catalog
//!
//! The catalog is the explicit registration table the host builds once at
//! startup: one entry per candidate module with its name, load priority,
//! enabled flag, and constructor. Load order is priority descending, then
//! name ascending, which keeps startup deterministic regardless of
//! registration order.

use crate::auth::AuthModule;
use crate::message::MessageSubscriber;
use crate::module::Module;
use std::sync::Arc;

/// A constructed module together with the capabilities it exposes.
///
/// Capabilities are declared at construction rather than discovered by
/// downcasting, so the host knows exactly what to wire without reflection.
pub struct ModuleParts {
    /// The lifecycle surface.
    pub module: Arc<dyn Module>,
    /// Bus subscriber capability, if the module consumes messages.
    pub subscriber: Option<Arc<dyn MessageSubscriber>>,
    /// Auth capability, if the module performs authentication.
    pub auth: Option<Arc<dyn AuthModule>>,
}

/// Constructor stored in the catalog for one module type.
pub type ModuleConstructor = Box<dyn Fn() -> ModuleParts + Send + Sync>;

/// One catalog entry: metadata plus constructor for a module type.
pub struct ModuleRegistration {
    /// Unique module name; load fails fast on duplicates.
    pub name: String,
    /// Load priority, higher loads earlier. Used only at load time.
    pub priority: i32,
    /// Disabled entries are skipped by the load sequence.
    pub enabled: bool,
    construct: ModuleConstructor,
}

impl ModuleRegistration {
    /// Creates an enabled registration.
    pub fn new<F>(name: &str, priority: i32, construct: F) -> Self
    where
        F: Fn() -> ModuleParts + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            priority,
            enabled: true,
            construct: Box::new(construct),
        }
    }

    /// Marks the registration disabled; it stays in the catalog but is
    /// filtered out of the load order.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Instantiates the module and its capabilities.
    pub fn construct(&self) -> ModuleParts {
        (self.construct)()
    }
}

impl std::fmt::Debug for ModuleRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistration")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// The full registration table consumed by the lifecycle manager.
#[derive(Debug, Default)]
pub struct ModuleCatalog {
    entries: Vec<ModuleRegistration>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration. Later duplicates are caught at load time, not
    /// here, so a catalog can be assembled from independent sources.
    pub fn register(&mut self, registration: ModuleRegistration) -> &mut Self {
        self.entries.push(registration);
        self
    }

    /// Enabled registrations in load order: priority descending, then name
    /// ascending.
    pub fn load_order(&self) -> Vec<&ModuleRegistration> {
        let mut ordered: Vec<&ModuleRegistration> =
            self.entries.iter().filter(|e| e.enabled).collect();
        ordered.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
        ordered
    }

    /// Looks up a registration by name, enabled or not.
    pub fn get(&self, name: &str) -> Option<&ModuleRegistration> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostContext;
    use crate::module::{Module, ModuleError};
    use async_trait::async_trait;

    struct Noop(String);

    #[async_trait]
    impl Module for Noop {
        fn name(&self) -> &str {
            &self.0
        }

        async fn initialize(&self, _context: Arc<dyn HostContext>) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn entry(name: &str, priority: i32) -> ModuleRegistration {
        let owned = name.to_string();
        ModuleRegistration::new(name, priority, move || ModuleParts {
            module: Arc::new(Noop(owned.clone())),
            subscriber: None,
            auth: None,
        })
    }

    #[test]
    fn load_order_is_priority_desc_then_name_asc() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register(entry("y_module", 5))
            .register(entry("z_module", 10))
            .register(entry("x_module", 10));

        let names: Vec<&str> = catalog.load_order().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["x_module", "z_module", "y_module"]);
    }

    #[test]
    fn disabled_entries_are_filtered() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register(entry("alpha", 0))
            .register(entry("beta", 0).disabled());

        let names: Vec<&str> = catalog.load_order().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha"]);
        assert!(catalog.get("beta").is_some());
    }

    #[test]
    fn construct_yields_named_module() {
        let catalog_entry = entry("gamma", 1);
        let parts = catalog_entry.construct();
        assert_eq!(parts.module.name(), "gamma");
        assert!(parts.subscriber.is_none());
        assert!(parts.auth.is_none());
    }
}
