//! # Module Lifecycle Manager
//!
//! Owns the ordered live-module list and drives every module through
//! create -> initialize -> post-initialize and
//! pre-uninitialize -> uninitialize -> removed.
//!
//! Each lifecycle call runs as its own spawned, cancellable unit of work
//! bounded by a timeout; a module that overruns is recorded as a timeout
//! failure and aborted, never awaited indefinitely. Unload is always the
//! exact reverse of load order. Presence in the live list is the single
//! source of truth consulted by the call gate.

use crate::error::ServerError;
use async_trait::async_trait;
use module_system::{
    AuthModule, CallGate, Gated, HostContext, LivenessProbe, MessageSubscriber, Module,
    ModuleCatalog, ModuleError, ModuleRegistration,
};
use once_cell::sync::OnceCell;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// A module present in the live list, with the capabilities it declared.
pub struct LoadedModule {
    name: String,
    module: Arc<dyn Module>,
    subscriber: Option<Arc<dyn MessageSubscriber>>,
    auth: Option<Arc<dyn AuthModule>>,
    gated_auth: Option<Gated<dyn AuthModule>>,
}

impl LoadedModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn subscriber(&self) -> Option<Arc<dyn MessageSubscriber>> {
        self.subscriber.clone()
    }

    pub fn auth(&self) -> Option<Arc<dyn AuthModule>> {
        self.auth.clone()
    }

    /// Gate-wrapped auth capability, built when the module entered the list.
    pub fn gated_auth(&self) -> Option<Gated<dyn AuthModule>> {
        self.gated_auth.clone()
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("subscriber", &self.subscriber.is_some())
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

/// Transition notifications consumed by the bus and the session manager so
/// subscriptions and auth wiring stay consistent with the live list.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn on_module_creating(&self, _name: &str) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn on_module_initializing(&self, _module: &LoadedModule) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn on_module_initialized(&self, _module: &LoadedModule) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn on_module_uninitializing(
        &self,
        _name: &str,
        _unload_timeout: Duration,
    ) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn on_module_uninitialized(&self, _name: &str) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// The four timeout-bounded lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initialize,
    PostInitialize,
    PreUninitialize,
    Uninitialize,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Initialize => "initialize",
            Phase::PostInitialize => "post_initialize",
            Phase::PreUninitialize => "pre_uninitialize",
            Phase::Uninitialize => "uninitialize",
        };
        f.write_str(name)
    }
}

enum PhaseOutcome {
    Completed,
    Failed(ModuleError),
    TimedOut,
}

/// Lifecycle timeouts, taken from the host configuration.
#[derive(Debug, Clone)]
pub struct LifecycleTimeouts {
    pub init: Duration,
    pub post_init: Duration,
    pub unload: Duration,
}

pub struct LifecycleManager {
    /// Live modules in load order; its own lock, shared with nothing else.
    modules: RwLock<Vec<Arc<LoadedModule>>>,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    timeouts: LifecycleTimeouts,
    gate: OnceCell<CallGate>,
}

impl LifecycleManager {
    pub fn new(timeouts: LifecycleTimeouts) -> Self {
        Self {
            modules: RwLock::new(Vec::new()),
            hooks: RwLock::new(Vec::new()),
            timeouts,
            gate: OnceCell::new(),
        }
    }

    /// Installs the call gate capability handles are wrapped with at load
    /// time. Set once by the host during construction.
    pub fn install_gate(&self, gate: CallGate) {
        let _ = self.gate.set(gate);
    }

    pub fn add_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.hooks
            .write()
            .expect("lifecycle hook lock poisoned")
            .push(hook);
    }

    pub fn unload_timeout(&self) -> Duration {
        self.timeouts.unload
    }

    /// Live module names in load order.
    pub fn live_modules(&self) -> Vec<String> {
        self.modules
            .read()
            .expect("module list lock poisoned")
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.read().expect("module list lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gate-wrapped auth capability of a live module, if it declared one.
    pub fn gated_auth(&self, name: &str) -> Option<Gated<dyn AuthModule>> {
        self.get(name).and_then(|m| m.gated_auth())
    }

    fn get(&self, name: &str) -> Option<Arc<LoadedModule>> {
        self.modules
            .read()
            .expect("module list lock poisoned")
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }

    fn add_to_list(&self, module: Arc<LoadedModule>) {
        self.modules
            .write()
            .expect("module list lock poisoned")
            .push(module);
    }

    fn remove_from_list(&self, name: &str) -> Option<Arc<LoadedModule>> {
        let mut modules = self.modules.write().expect("module list lock poisoned");
        let index = modules.iter().position(|m| m.name == name)?;
        Some(modules.remove(index))
    }

    fn hooks_snapshot(&self) -> Vec<Arc<dyn LifecycleHook>> {
        self.hooks
            .read()
            .expect("lifecycle hook lock poisoned")
            .clone()
    }

    /// Loads one module. `Ok(true)` means fully successful; `Ok(false)` means
    /// the module was loaded (or backed out after a timeout) with a
    /// non-fatal failure recorded. `Err` is an initialize failure or a
    /// duplicate, with the module backed out of the list.
    pub async fn load_module(
        &self,
        registration: &ModuleRegistration,
        context: Arc<dyn HostContext>,
    ) -> Result<bool, ServerError> {
        let name = registration.name.clone();
        if self.get(&name).is_some() {
            return Err(ServerError::DuplicateModule(name));
        }

        for hook in self.hooks_snapshot() {
            if let Err(err) = hook.on_module_creating(&name).await {
                warn!(module = %name, "creating hook failed: {err}");
            }
        }

        let parts = registration.construct();
        let gated_auth = match (self.gate.get(), &parts.auth) {
            (Some(gate), Some(auth)) => Some(Gated::new(&name, Arc::clone(auth), gate.clone())),
            _ => None,
        };
        let loaded = Arc::new(LoadedModule {
            name: name.clone(),
            module: parts.module,
            subscriber: parts.subscriber,
            auth: parts.auth,
            gated_auth,
        });

        for hook in self.hooks_snapshot() {
            if let Err(err) = hook.on_module_initializing(&loaded).await {
                warn!(module = %name, "initializing hook failed: {err}");
            }
        }

        // Visible to the gate from here on.
        self.add_to_list(loaded.clone());

        let timeout = loaded.module.init_timeout().unwrap_or(self.timeouts.init);
        match self
            .run_phase(&loaded, Phase::Initialize, timeout, context.clone())
            .await
        {
            PhaseOutcome::Completed => {}
            PhaseOutcome::TimedOut => {
                warn!(module = %name, timeout = ?timeout, "initialize timed out, backing module out");
                self.back_out(&name).await;
                return Ok(false);
            }
            PhaseOutcome::Failed(err) => {
                error!(module = %name, "initialize failed: {err}");
                self.back_out(&name).await;
                return Err(ServerError::Module(err));
            }
        }

        let mut fully = true;
        for hook in self.hooks_snapshot() {
            if let Err(err) = hook.on_module_initialized(&loaded).await {
                error!(module = %name, "initialized hook failed: {err}");
                fully = false;
            }
        }
        info!(module = %name, "module loaded");
        Ok(fully)
    }

    /// Removes a module that failed to come up: uninitializing notification,
    /// list removal, uninitialized notification. No `uninitialize` call; the
    /// module never finished initializing.
    async fn back_out(&self, name: &str) {
        for hook in self.hooks_snapshot() {
            if let Err(err) = hook
                .on_module_uninitializing(name, self.timeouts.unload)
                .await
            {
                warn!(module = %name, "uninitializing hook failed: {err}");
            }
        }
        self.remove_from_list(name);
        for hook in self.hooks_snapshot() {
            if let Err(err) = hook.on_module_uninitialized(name).await {
                warn!(module = %name, "uninitialized hook failed: {err}");
            }
        }
    }

    /// Unloads one module. Failures during teardown are logged and reflected
    /// in the returned flag; unload always proceeds to removal.
    pub async fn unload_module(
        &self,
        name: &str,
        context: Arc<dyn HostContext>,
    ) -> Result<bool, ServerError> {
        let loaded = self
            .get(name)
            .ok_or_else(|| ServerError::Module(ModuleError::NotFound(name.to_string())))?;
        let mut fully = true;

        for hook in self.hooks_snapshot() {
            if let Err(err) = hook
                .on_module_uninitializing(name, self.timeouts.unload)
                .await
            {
                warn!(module = %name, "uninitializing hook failed: {err}");
                fully = false;
            }
        }

        match self
            .run_phase(&loaded, Phase::Uninitialize, self.timeouts.unload, context)
            .await
        {
            PhaseOutcome::Completed => {}
            PhaseOutcome::TimedOut => {
                warn!(module = %name, "uninitialize timed out");
                fully = false;
            }
            PhaseOutcome::Failed(err) => {
                error!(module = %name, "uninitialize failed: {err}");
                fully = false;
            }
        }

        self.remove_from_list(name);

        for hook in self.hooks_snapshot() {
            if let Err(err) = hook.on_module_uninitialized(name).await {
                warn!(module = %name, "uninitialized hook failed: {err}");
                fully = false;
            }
        }
        info!(module = %name, "module unloaded");
        Ok(fully)
    }

    /// Loads every enabled catalog entry in priority-desc, name-asc order.
    /// Module failures are contained and accumulate into the returned flag.
    pub async fn load_all(&self, catalog: &ModuleCatalog, context: Arc<dyn HostContext>) -> bool {
        let mut fully = true;
        for registration in catalog.load_order() {
            match self.load_module(registration, context.clone()).await {
                Ok(true) => {}
                Ok(false) => fully = false,
                Err(err) => {
                    error!(module = %registration.name, "module load failed: {err}");
                    fully = false;
                }
            }
        }
        fully
    }

    /// Post-initialize pass over all loaded modules, forward order.
    pub async fn post_initialize_all(&self, context: Arc<dyn HostContext>) -> bool {
        self.run_pass(Phase::PostInitialize, self.timeouts.post_init, context)
            .await
    }

    /// Pre-uninitialize pass over all loaded modules, forward order, while
    /// every module is still live.
    pub async fn pre_uninitialize_all(&self, context: Arc<dyn HostContext>) -> bool {
        self.run_pass(Phase::PreUninitialize, self.timeouts.post_init, context)
            .await
    }

    async fn run_pass(
        &self,
        phase: Phase,
        timeout: Duration,
        context: Arc<dyn HostContext>,
    ) -> bool {
        let snapshot: Vec<Arc<LoadedModule>> = self
            .modules
            .read()
            .expect("module list lock poisoned")
            .clone();
        let mut fully = true;
        for loaded in snapshot {
            match self
                .run_phase(&loaded, phase, timeout, context.clone())
                .await
            {
                PhaseOutcome::Completed => {}
                PhaseOutcome::TimedOut => {
                    warn!(module = %loaded.name, phase = %phase, "phase timed out");
                    fully = false;
                }
                PhaseOutcome::Failed(err) => {
                    error!(module = %loaded.name, phase = %phase, "phase failed: {err}");
                    fully = false;
                }
            }
        }
        fully
    }

    /// Unloads every module in exact reverse load order.
    pub async fn unload_all(&self, context: Arc<dyn HostContext>) -> bool {
        let mut names = self.live_modules();
        names.reverse();
        let mut fully = true;
        for name in names {
            match self.unload_module(&name, context.clone()).await {
                Ok(true) => {}
                Ok(false) => fully = false,
                Err(err) => {
                    error!(module = %name, "module unload failed: {err}");
                    fully = false;
                }
            }
        }
        fully
    }

    /// Runs one lifecycle call as a spawned unit of work bounded by
    /// `timeout`. On expiry the task is aborted; modules must tolerate the
    /// future being dropped mid-flight.
    async fn run_phase(
        &self,
        loaded: &Arc<LoadedModule>,
        phase: Phase,
        timeout: Duration,
        context: Arc<dyn HostContext>,
    ) -> PhaseOutcome {
        let module = loaded.module.clone();
        let mut handle = tokio::spawn(async move {
            match phase {
                Phase::Initialize => module.initialize(context).await,
                Phase::PostInitialize => module.post_initialize(context).await,
                Phase::PreUninitialize => module.pre_uninitialize(context).await,
                Phase::Uninitialize => module.uninitialize(context).await,
            }
        });

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(())) => PhaseOutcome::Completed,
                Ok(Err(err)) => PhaseOutcome::Failed(err),
                Err(join_err) => PhaseOutcome::Failed(ModuleError::Runtime(format!(
                    "{phase} task failed: {join_err}"
                ))),
            },
            _ = tokio::time::sleep(timeout) => {
                handle.abort();
                PhaseOutcome::TimedOut
            }
        }
    }
}

impl LivenessProbe for LifecycleManager {
    fn is_live(&self, module: &str) -> bool {
        self.get(module).is_some()
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("live", &self.live_modules())
            .finish_non_exhaustive()
    }
}
