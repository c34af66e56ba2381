//! # Call Gate
//!
//! The call gate is the liveness boundary for cross-module calls. Presence in
//! the lifecycle manager's live list is the single source of truth for "is
//! this module alive"; the gate consults that list (through [`LivenessProbe`])
//! on every gated call and fails with a distinct, retry-distinguishable error
//! when either end has been unloaded.
//!
//! Instead of a runtime proxy, interception is an explicit decorator:
//! capability handles are handed out wrapped in [`Gated`], whose accessor is
//! the before-invoke hook.

use crate::context::CallContext;
use std::sync::Arc;

/// Live-list membership check, implemented by the lifecycle manager.
pub trait LivenessProbe: Send + Sync {
    fn is_live(&self, module: &str) -> bool;
}

/// Stale-reference failures surfaced to callers as structured errors so
/// retry logic can tell them apart from business errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GateError {
    /// The module the call runs on behalf of is no longer loaded.
    #[error("caller module '{0}' is no longer loaded")]
    UnloadedCaller(String),
    /// The module the call resolves to is no longer loaded.
    #[error("target module '{0}' is no longer loaded")]
    UnloadedTarget(String),
}

/// Shared gate handle; clones are cheap and all consult the same probe.
#[derive(Clone)]
pub struct CallGate {
    probe: Arc<dyn LivenessProbe>,
}

impl CallGate {
    pub fn new(probe: Arc<dyn LivenessProbe>) -> Self {
        Self { probe }
    }

    /// Before-invoke hook for any call directed at the server on behalf of a
    /// module. Host-originated work (no module in the context) always passes.
    pub fn check_caller(&self, origin: &CallContext) -> Result<(), GateError> {
        match origin.module_name() {
            Some(name) if !self.probe.is_live(name) => {
                Err(GateError::UnloadedCaller(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Additional check when the call resolves to a second module as target.
    pub fn check_target(&self, target: &str) -> Result<(), GateError> {
        if self.probe.is_live(target) {
            Ok(())
        } else {
            Err(GateError::UnloadedTarget(target.to_string()))
        }
    }
}

impl std::fmt::Debug for CallGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGate").finish_non_exhaustive()
    }
}

/// Decorator around a capability handle owned by a module.
///
/// Service lookup returns these instead of bare `Arc`s; every access runs
/// the caller and target liveness checks first, so a stale handle kept
/// across an unload can never complete work.
pub struct Gated<T: ?Sized> {
    owner: String,
    inner: Arc<T>,
    gate: CallGate,
}

impl<T: ?Sized> Gated<T> {
    pub fn new(owner: &str, inner: Arc<T>, gate: CallGate) -> Self {
        Self {
            owner: owner.to_string(),
            inner,
            gate,
        }
    }

    /// Module that owns the wrapped capability.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Gated access: verifies both ends are live, then exposes the handle
    /// for the duration of the call.
    pub fn call(&self, origin: &CallContext) -> Result<&T, GateError> {
        self.gate.check_caller(origin)?;
        self.gate.check_target(&self.owner)?;
        Ok(&*self.inner)
    }
}

impl<T: ?Sized> std::fmt::Debug for Gated<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gated")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Clone for Gated<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            inner: Arc::clone(&self.inner),
            gate: self.gate.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProbe {
        live: Mutex<HashSet<String>>,
    }

    impl FakeProbe {
        fn add(&self, name: &str) {
            self.live.lock().unwrap().insert(name.to_string());
        }

        fn remove(&self, name: &str) {
            self.live.lock().unwrap().remove(name);
        }
    }

    impl LivenessProbe for FakeProbe {
        fn is_live(&self, module: &str) -> bool {
            self.live.lock().unwrap().contains(module)
        }
    }

    #[test]
    fn host_calls_always_pass_caller_check() {
        let gate = CallGate::new(Arc::new(FakeProbe::default()));
        assert!(gate.check_caller(&CallContext::system()).is_ok());
    }

    #[test]
    fn unloaded_caller_is_rejected() {
        let probe = Arc::new(FakeProbe::default());
        probe.add("alpha");
        let gate = CallGate::new(probe.clone());

        let ctx = CallContext::for_module("alpha");
        assert!(gate.check_caller(&ctx).is_ok());

        probe.remove("alpha");
        assert_eq!(
            gate.check_caller(&ctx),
            Err(GateError::UnloadedCaller("alpha".to_string()))
        );
    }

    #[test]
    fn gated_handle_checks_both_ends() {
        let probe = Arc::new(FakeProbe::default());
        probe.add("caller");
        probe.add("service");
        let gate = CallGate::new(probe.clone());

        let handle: Gated<str> = Gated::new("service", Arc::from("payload"), gate);
        let ctx = CallContext::for_module("caller");
        assert!(handle.call(&ctx).is_ok());

        probe.remove("service");
        assert_eq!(
            handle.call(&ctx).unwrap_err(),
            GateError::UnloadedTarget("service".to_string())
        );

        probe.add("service");
        probe.remove("caller");
        assert_eq!(
            handle.call(&ctx).unwrap_err(),
            GateError::UnloadedCaller("caller".to_string())
        );
    }
}
