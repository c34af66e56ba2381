//! Telemetry module: periodic heartbeat publisher and bus subscriber.
//!
//! Exercises both module capabilities end to end: a background task publishes
//! a client-visible heartbeat on an interval, and the module subscribes to
//! its own heartbeat type so deliveries flow through a real subscription
//! worker. The publisher task stops on its own once the module is unloaded,
//! because the call gate rejects its next publish.

use async_trait::async_trait;
use module_system::{
    BusMessage, CallContext, HostContext, MessageSubscriber, Module, ModuleError, ModuleParts,
    ModuleRegistration,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MODULE_NAME: &str = "telemetry";
pub const HEARTBEAT_TYPE: &str = "telemetry.heartbeat";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sequence: u64,
    pub uptime_secs: u64,
}

impl BusMessage for Heartbeat {
    fn type_name(&self) -> &str {
        HEARTBEAT_TYPE
    }

    fn duplicate(&self) -> Box<dyn BusMessage> {
        Box::new(self.clone())
    }

    fn client_payload(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct TelemetryModule {
    interval: Duration,
    received: AtomicU64,
    publisher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TelemetryModule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            received: AtomicU64::new(0),
            publisher: Mutex::new(None),
        }
    }

    /// Heartbeats observed through the bus so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Module for TelemetryModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    async fn initialize(&self, context: Arc<dyn HostContext>) -> Result<(), ModuleError> {
        context
            .subscribe(&CallContext::for_module(MODULE_NAME), HEARTBEAT_TYPE)
            .await?;
        info!(interval = ?self.interval, "📡 telemetry module ready");
        Ok(())
    }

    async fn post_initialize(&self, context: Arc<dyn HostContext>) -> Result<(), ModuleError> {
        // Publisher starts only once every module is up, so early heartbeats
        // are not lost on modules still initializing.
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let started = std::time::Instant::now();
            let origin = CallContext::for_module(MODULE_NAME);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut sequence = 0u64;
            loop {
                ticker.tick().await;
                sequence += 1;
                let beat = Heartbeat {
                    sequence,
                    uptime_secs: started.elapsed().as_secs(),
                };
                match context.publish(&origin, Box::new(beat)).await {
                    Ok(queued) => debug!(sequence, queued, "heartbeat published"),
                    Err(ModuleError::Gate(_)) => break,
                    Err(err) => {
                        warn!("heartbeat publish failed: {err}");
                        break;
                    }
                }
            }
        });
        *self.publisher.lock().expect("publisher lock poisoned") = Some(handle);
        Ok(())
    }

    async fn uninitialize(&self, _context: Arc<dyn HostContext>) -> Result<(), ModuleError> {
        if let Some(handle) = self.publisher.lock().expect("publisher lock poisoned").take() {
            handle.abort();
        }
        info!(received = self.received(), "telemetry module shut down");
        Ok(())
    }
}

#[async_trait]
impl MessageSubscriber for TelemetryModule {
    async fn on_message(
        &self,
        message: &dyn BusMessage,
        origin: &CallContext,
    ) -> Result<(), ModuleError> {
        let beat = message
            .as_any()
            .downcast_ref::<Heartbeat>()
            .ok_or_else(|| ModuleError::Execution("unexpected message type".to_string()))?;
        self.received.fetch_add(1, Ordering::Relaxed);
        debug!(
            sequence = beat.sequence,
            from = origin.module_name().unwrap_or("<host>"),
            "heartbeat received"
        );
        Ok(())
    }
}

/// Catalog registration with the default one-second heartbeat.
pub fn registration() -> ModuleRegistration {
    registration_with_interval(Duration::from_secs(1))
}

pub fn registration_with_interval(interval: Duration) -> ModuleRegistration {
    ModuleRegistration::new(MODULE_NAME, 0, move || {
        let module = Arc::new(TelemetryModule::new(interval));
        ModuleParts {
            module: module.clone(),
            subscriber: Some(module),
            auth: None,
        }
    })
}
