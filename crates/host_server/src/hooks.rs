//! Lifecycle hooks wiring the bus and the session manager to the live list.

use crate::lifecycle::{LifecycleHook, LoadedModule};
use async_trait::async_trait;
use message_bus::MessageBus;
use module_system::ModuleError;
use session_manager::SessionManager;
use std::sync::Arc;
use std::time::Duration;

/// Creates the subscription record at Initializing, starts the worker at
/// Initialized, stops it at Uninitializing, and drops the record (with any
/// remaining registry entries) at Uninitialized.
pub struct BusLifecycleHook {
    bus: Arc<MessageBus>,
}

impl BusLifecycleHook {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl LifecycleHook for BusLifecycleHook {
    async fn on_module_initializing(&self, module: &LoadedModule) -> Result<(), ModuleError> {
        if let Some(subscriber) = module.subscriber() {
            self.bus.register_subscription(module.name(), subscriber);
        }
        Ok(())
    }

    async fn on_module_initialized(&self, module: &LoadedModule) -> Result<(), ModuleError> {
        if module.subscriber().is_some() {
            self.bus
                .start_subscription(module.name())
                .await
                .map_err(|err| ModuleError::Runtime(err.to_string()))?;
        }
        Ok(())
    }

    async fn on_module_uninitializing(
        &self,
        name: &str,
        unload_timeout: Duration,
    ) -> Result<(), ModuleError> {
        // Modules without a subscriber capability have no record to stop.
        if !self.bus.is_subscriber(name) {
            return Ok(());
        }
        match self.bus.stop_subscription(name, unload_timeout).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ModuleError::Runtime(format!(
                "bus worker for '{name}' did not stop within {unload_timeout:?}"
            ))),
            Err(err) => Err(ModuleError::Runtime(err.to_string())),
        }
    }

    async fn on_module_uninitialized(&self, name: &str) -> Result<(), ModuleError> {
        self.bus.remove_subscription(name);
        Ok(())
    }
}

/// Registers a module's auth capability (restoring persisted sessions) once
/// the module is initialized and deregisters it, dropping its sessions, when
/// the module starts unloading.
pub struct SessionLifecycleHook {
    sessions: Arc<SessionManager>,
}

impl SessionLifecycleHook {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl LifecycleHook for SessionLifecycleHook {
    async fn on_module_initialized(&self, module: &LoadedModule) -> Result<(), ModuleError> {
        if let Some(auth) = module.auth() {
            self.sessions.register_auth_module(module.name(), auth).await;
        }
        Ok(())
    }

    async fn on_module_uninitializing(
        &self,
        name: &str,
        _unload_timeout: Duration,
    ) -> Result<(), ModuleError> {
        self.sessions.deregister_auth_module(name);
        Ok(())
    }
}
