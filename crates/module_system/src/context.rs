//! # Call Context and Host Context
//!
//! [`CallContext`] is the explicit ambient identity for a unit of work: which
//! module (if any) is acting, which session the work belongs to, and how the
//! originating call arrived. It is an ordinary value, threaded through every
//! call and *captured* into queued work such as bus deliveries, so that
//! deferred execution is still attributed to the module that triggered it.
//! No thread-local storage is involved, which keeps attribution correct
//! across worker-pool hops.
//!
//! [`HostContext`] is the interface modules use to reach host services during
//! their lifecycle and while handling messages. It deliberately exposes only
//! the bus surface, structured logging, and the coarse server state.

use crate::auth::AuthModule;
use crate::gate::Gated;
use crate::message::BusMessage;
use crate::module::ModuleError;
use crate::record_log::LogLevel;
use crate::types::{ServerState, SessionId, TransportClass};
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;

/// Ambient identity for the current unit of work.
///
/// Cheap to clone; captured by value wherever work is queued for later
/// execution.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Module on whose behalf the work runs, `None` for host-originated work.
    module: Option<Arc<str>>,
    /// Session the work is attributed to; [`SessionId::ANONYMOUS`] pre-auth.
    pub session: SessionId,
    /// Source address of the originating call, if it came from outside.
    pub remote_addr: Option<IpAddr>,
    /// Transport class of the originating call.
    pub transport: TransportClass,
}

impl CallContext {
    /// Context for work the host itself initiates (startup, sweeps, timers).
    pub fn system() -> Self {
        Self {
            module: None,
            session: SessionId::ANONYMOUS,
            remote_addr: None,
            transport: TransportClass::InProcess,
        }
    }

    /// Context for work running on behalf of a named module.
    pub fn for_module(name: &str) -> Self {
        Self {
            module: Some(Arc::from(name)),
            session: SessionId::ANONYMOUS,
            remote_addr: None,
            transport: TransportClass::InProcess,
        }
    }

    /// Context for an inbound remote call, before session resolution.
    pub fn inbound(remote_addr: IpAddr, transport: TransportClass) -> Self {
        Self {
            module: None,
            session: SessionId::ANONYMOUS,
            remote_addr: Some(remote_addr),
            transport,
        }
    }

    /// Tags the context with a resolved session id.
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    /// Re-attributes the context to a module, keeping call provenance.
    pub fn with_module(mut self, name: &str) -> Self {
        self.module = Some(Arc::from(name));
        self
    }

    /// Name of the acting module, if any.
    pub fn module_name(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// True when the call came from the local machine or from inside the
    /// process. Remote-access permission checks key off this.
    pub fn is_local(&self) -> bool {
        match self.remote_addr {
            None => true,
            Some(addr) => addr.is_loopback(),
        }
    }
}

/// Host services exposed to modules.
///
/// The host constructs one shared context and hands it to every module
/// lifecycle call. All methods are safe to call concurrently.
#[async_trait]
pub trait HostContext: Send + Sync + Debug {
    /// Publishes a message on the bus. Returns the number of module
    /// subscriptions the message was queued for.
    async fn publish(
        &self,
        origin: &CallContext,
        message: Box<dyn BusMessage>,
    ) -> Result<usize, ModuleError>;

    /// Subscribes the calling module to a message type. Valid only while the
    /// server is Starting or Started.
    async fn subscribe(&self, origin: &CallContext, message_type: &str)
        -> Result<(), ModuleError>;

    /// Removes the calling module's subscription to a message type.
    async fn unsubscribe(
        &self,
        origin: &CallContext,
        message_type: &str,
    ) -> Result<(), ModuleError>;

    /// Looks up another module's authentication capability by module name.
    ///
    /// The returned handle is the gated decorator built when the target was
    /// loaded: every access re-runs the caller and target liveness checks,
    /// so a handle kept across an unload fails instead of reaching a dead
    /// module.
    fn auth_provider(
        &self,
        origin: &CallContext,
        module: &str,
    ) -> Result<Gated<dyn AuthModule>, ModuleError>;

    /// Writes a record through the host's outbound log, with long messages
    /// split into multiple records.
    fn log(&self, level: LogLevel, event_id: u32, message: &str);

    /// Current coarse server state.
    fn state(&self) -> ServerState;
}
