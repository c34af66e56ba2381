//! The host server façade: state machine, singleton rule, start/stop.

use crate::config::HostConfig;
use crate::error::ServerError;
use crate::hooks::{BusLifecycleHook, SessionLifecycleHook};
use crate::lifecycle::{LifecycleManager, LifecycleTimeouts};
use crate::state::StateCell;
use async_trait::async_trait;
use message_bus::{BusError, MessageBus};
use module_system::record_log::{self, LogLevel, RecordSink, TracingSink};
use module_system::{
    AuthModule, BusMessage, CallContext, CallGate, Gated, HostContext, ModuleCatalog,
    ModuleError, ServerState, ShutdownSignal,
};
use once_cell::sync::Lazy;
use session_manager::{spawn_sweep, SessionManager};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// At most one host instance may be active (non-Stopped) per process.
static ACTIVE: Lazy<Mutex<Weak<HostServer>>> = Lazy::new(|| Mutex::new(Weak::new()));

struct RunState {
    shutdown: ShutdownSignal,
    sweep: JoinHandle<()>,
}

/// The module host.
///
/// Wires the lifecycle manager, bus, and session manager together and drives
/// them through the Stopped/Starting/Started/Stopping state machine.
/// `start` reports partial success instead of failing on ordinary module
/// problems; `stop` is idempotent and always drains to Stopped.
pub struct HostServer {
    config: HostConfig,
    catalog: ModuleCatalog,
    state: Arc<StateCell>,
    lifecycle: Arc<LifecycleManager>,
    bus: Arc<MessageBus>,
    sessions: Arc<SessionManager>,
    gate: CallGate,
    sink: Arc<dyn RecordSink>,
    run: Mutex<Option<RunState>>,
}

impl HostServer {
    pub fn new(config: HostConfig, catalog: ModuleCatalog) -> Result<Arc<Self>, ServerError> {
        config.validate()?;

        let state = Arc::new(StateCell::new());
        let bus = Arc::new(MessageBus::new());
        bus.set_state_probe(state.clone());

        let sessions = Arc::new(SessionManager::new(config.session_config()));
        bus.set_session_sink(sessions.clone());

        let lifecycle = Arc::new(LifecycleManager::new(LifecycleTimeouts {
            init: config.init_timeout(),
            post_init: config.post_init_timeout(),
            unload: config.unload_timeout(),
        }));
        lifecycle.add_hook(Arc::new(BusLifecycleHook::new(bus.clone())));
        lifecycle.add_hook(Arc::new(SessionLifecycleHook::new(sessions.clone())));

        let gate = CallGate::new(lifecycle.clone());
        lifecycle.install_gate(gate.clone());

        Ok(Arc::new(Self {
            config,
            catalog,
            state,
            lifecycle,
            bus,
            sessions,
            gate,
            sink: Arc::new(TracingSink),
            run: Mutex::new(None),
        }))
    }

    pub fn state(&self) -> ServerState {
        self.state.current()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn gate(&self) -> &CallGate {
        &self.gate
    }

    /// Host context handed to modules and host-side code.
    pub fn context(&self) -> Arc<dyn HostContext> {
        Arc::new(HostHandle {
            bus: self.bus.clone(),
            state: self.state.clone(),
            lifecycle: self.lifecycle.clone(),
            gate: self.gate.clone(),
            sink: self.sink.clone(),
        })
    }

    /// Starts the host: Stopped -> Starting, load every catalog module in
    /// priority order, post-initialize pass, Starting -> Started.
    ///
    /// Returns `Ok(true)` on a fully successful start and `Ok(false)` when
    /// one or more modules failed or timed out without being fatal. Fatal
    /// startup failures force the state back to Stopped and propagate.
    pub async fn start(self: &Arc<Self>) -> Result<bool, ServerError> {
        self.claim_singleton()?;
        self.state
            .transition("start", ServerState::Stopped, ServerState::Starting)?;

        match self.start_sequence().await {
            Ok(fully) => {
                info!(
                    modules = self.lifecycle.len(),
                    fully_successful = fully,
                    "🚀 host server started"
                );
                Ok(fully)
            }
            Err(err) => {
                // Best-effort teardown, then force Stopped and re-raise.
                warn!("fatal startup failure, rolling back: {err}");
                let context = self.context();
                self.lifecycle.unload_all(context).await;
                self.halt_background();
                self.state.force(ServerState::Stopped);
                Err(err)
            }
        }
    }

    async fn start_sequence(self: &Arc<Self>) -> Result<bool, ServerError> {
        let shutdown = ShutdownSignal::new();
        let sweep = spawn_sweep(self.sessions.clone(), shutdown.clone());
        *self.run.lock().expect("run state lock poisoned") = Some(RunState { shutdown, sweep });

        let context = self.context();
        let mut fully = self.lifecycle.load_all(&self.catalog, context.clone()).await;
        fully &= self.lifecycle.post_initialize_all(context).await;

        self.state
            .transition("start", ServerState::Starting, ServerState::Started)?;
        Ok(fully)
    }

    /// Stops the host: pre-uninitialize pass, unload in reverse load order,
    /// drain to Stopped. Calling `stop` on a Stopped server is a no-op.
    pub async fn stop(self: &Arc<Self>) -> Result<(), ServerError> {
        match self.state.current() {
            ServerState::Stopped => return Ok(()),
            ServerState::Started => {}
            state => {
                return Err(ServerError::InvalidState {
                    operation: "stop",
                    state,
                })
            }
        }
        self.state
            .transition("stop", ServerState::Started, ServerState::Stopping)?;

        let context = self.context();
        self.lifecycle.pre_uninitialize_all(context.clone()).await;
        self.lifecycle.unload_all(context).await;
        self.halt_background_and_join().await;

        self.state
            .transition("stop", ServerState::Stopping, ServerState::Stopped)?;
        info!("🛑 host server stopped");
        Ok(())
    }

    fn claim_singleton(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut active = ACTIVE.lock().expect("active instance lock poisoned");
        if let Some(existing) = active.upgrade() {
            if !Arc::ptr_eq(&existing, self) && existing.state() != ServerState::Stopped {
                return Err(ServerError::InstanceAlreadyActive);
            }
        }
        *active = Arc::downgrade(self);
        Ok(())
    }

    fn halt_background(&self) {
        if let Some(run) = self.run.lock().expect("run state lock poisoned").take() {
            run.shutdown.trigger();
            run.sweep.abort();
        }
    }

    async fn halt_background_and_join(&self) {
        let run = self.run.lock().expect("run state lock poisoned").take();
        if let Some(run) = run {
            run.shutdown.trigger();
            if tokio::time::timeout(self.config.unload_timeout(), run.sweep)
                .await
                .is_err()
            {
                warn!("session sweep did not stop within the unload timeout");
            }
        }
    }
}

impl std::fmt::Debug for HostServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServer")
            .field("state", &self.state.current())
            .field("modules", &self.lifecycle.live_modules())
            .finish_non_exhaustive()
    }
}

/// Shared [`HostContext`] implementation: every bus operation first passes
/// the call gate, so an unloaded module can neither publish nor manage
/// subscriptions through a stale handle.
struct HostHandle {
    bus: Arc<MessageBus>,
    state: Arc<StateCell>,
    lifecycle: Arc<LifecycleManager>,
    gate: CallGate,
    sink: Arc<dyn RecordSink>,
}

fn bus_to_module(err: BusError) -> ModuleError {
    match err {
        BusError::Gate(gate) => ModuleError::Gate(gate),
        other => ModuleError::Execution(other.to_string()),
    }
}

#[async_trait]
impl HostContext for HostHandle {
    async fn publish(
        &self,
        origin: &CallContext,
        message: Box<dyn BusMessage>,
    ) -> Result<usize, ModuleError> {
        self.gate.check_caller(origin)?;
        self.bus
            .send(origin, message.as_ref(), None)
            .map_err(bus_to_module)
    }

    async fn subscribe(
        &self,
        origin: &CallContext,
        message_type: &str,
    ) -> Result<(), ModuleError> {
        self.gate.check_caller(origin)?;
        self.bus.subscribe(origin, message_type).map_err(bus_to_module)
    }

    async fn unsubscribe(
        &self,
        origin: &CallContext,
        message_type: &str,
    ) -> Result<(), ModuleError> {
        self.gate.check_caller(origin)?;
        self.bus
            .unsubscribe(origin, message_type)
            .map_err(bus_to_module)
    }

    fn auth_provider(
        &self,
        origin: &CallContext,
        module: &str,
    ) -> Result<Gated<dyn AuthModule>, ModuleError> {
        self.gate.check_caller(origin)?;
        self.gate.check_target(module)?;
        self.lifecycle.gated_auth(module).ok_or_else(|| {
            ModuleError::NotFound(format!("module '{module}' has no auth capability"))
        })
    }

    fn log(&self, level: LogLevel, event_id: u32, message: &str) {
        record_log::emit(self.sink.as_ref(), level, event_id, message);
    }

    fn state(&self) -> ServerState {
        self.state.current()
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("state", &self.state.current())
            .finish_non_exhaustive()
    }
}
