//! # Meridian Module System
//!
//! Shared interfaces for the Meridian module host. This crate defines the
//! contracts the host and its modules agree on, without pulling in any of the
//! engine crates:
//!
//! * **Module lifecycle** - the [`Module`] trait with its four lifecycle
//!   phases, driven by the host's lifecycle manager
//! * **Capabilities** - [`MessageSubscriber`] for bus delivery and
//!   [`AuthModule`] for authentication, discovered at registration time
//! * **Registration catalog** - the explicit [`ModuleCatalog`] table that
//!   replaces any runtime type discovery
//! * **Call context** - the [`CallContext`] value that attributes every piece
//!   of work, including queued bus deliveries, to the module that caused it
//! * **Call gate** - the [`CallGate`] liveness boundary preventing unloaded
//!   modules from originating or receiving calls
//!
//! Engine crates (`message_bus`, `session_manager`, `host_server`) depend on
//! this crate; modules depend only on this crate.

pub mod auth;
pub mod catalog;
pub mod context;
pub mod gate;
pub mod message;
pub mod module;
pub mod record_log;
pub mod shutdown;
pub mod types;

pub use auth::{AuthModule, PersistedSession};
pub use catalog::{ModuleCatalog, ModuleParts, ModuleRegistration};
pub use context::{CallContext, HostContext};
pub use gate::{CallGate, GateError, Gated, LivenessProbe};
pub use message::{BusMessage, MessageSubscriber};
pub use module::{Module, ModuleError};
pub use record_log::{LogLevel, RecordSink, TracingSink, MAX_RECORD_LEN};
pub use shutdown::ShutdownSignal;
pub use types::{
    OrgGroup, OrgGroupId, PermissionSet, Principal, ServerState, SessionId, TransportClass,
    TrustModel,
};

// Re-export async_trait so modules don't need a direct dependency.
pub use async_trait::async_trait;
