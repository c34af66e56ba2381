//! # Meridian Host Server
//!
//! The server engine: coarse state machine, module lifecycle manager, and
//! the [`HostServer`] façade that wires the message bus and session manager
//! to the live module list through lifecycle hooks.
//!
//! Guarantees enforced here:
//!
//! * Load order is priority descending then name ascending; unload is the
//!   exact reverse of load order
//! * Every lifecycle phase runs as a spawned unit of work bounded by a
//!   timeout; overruns are recorded as non-fatal timeout failures
//! * `start` returns a fully-successful flag instead of failing on ordinary
//!   module problems; `stop` is idempotent and always drains to Stopped
//! * The call gate blocks publishes and subscription changes from modules
//!   that are no longer in the live list
//! * At most one non-Stopped host instance exists per process

pub mod config;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod server;
pub mod state;


pub use config::HostConfig;
pub use error::ServerError;
pub use hooks::{BusLifecycleHook, SessionLifecycleHook};
pub use lifecycle::{LifecycleHook, LifecycleManager, LifecycleTimeouts, LoadedModule};
pub use server::HostServer;
pub use state::StateCell;
