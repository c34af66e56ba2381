//! # Publish/Subscribe Message Bus
//!
//! Routes typed messages to per-module single-consumer queues:
//!
//! * **Registry** - message-type name to subscriber-set mapping, each set
//!   under its own lock, with first-subscriber / last-unsubscriber
//!   notifications
//! * **Subscriptions** - one queue and one dedicated worker per subscribing
//!   module; strict FIFO per module, no ordering across modules
//! * **Isolation** - every recipient gets its own [`BusMessage::duplicate`]
//!   copy; handler failures are wrapped with module and message-type context,
//!   logged, and never reach the sender or other subscribers
//! * **Session tap** - messages that expose a client payload are forwarded to
//!   the session manager's mailbox sink for pull delivery
//!
//! The subscription lifecycle follows the owning module's: created at
//! Initializing, started at Initialized, stopped at Uninitializing, removed
//! at Uninitialized.
//!
//! [`BusMessage::duplicate`]: module_system::BusMessage::duplicate

mod bus;
mod error;
mod registry;
mod subscription;

pub use bus::{BusHook, MessageBus, ServerStateProbe, SessionSink};
pub use error::BusError;
pub use subscription::SubscriptionState;
