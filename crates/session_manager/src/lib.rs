//! # Session & Authentication Manager
//!
//! Maintains the concurrent session table and everything around it:
//!
//! * **Trust models** - None / SessionId / IP / Login resolution for inbound
//!   calls, plus explicit `logon` / `logon_as` / `trusted_logon`
//! * **Policy checks** - account expiry, org-group concurrent-session cap,
//!   remote-access permission for non-local callers, transport-class
//!   permissions, single-session-per-login
//! * **Sliding expiration** - every successful lookup refreshes the session;
//!   a periodic sweep is the only actor that removes expired sessions
//! * **Pull mailboxes** - per-session outbound queues acknowledged by
//!   last-seen id, fed by the bus through the [`SessionSink`] tap
//!
//! Session ids are strictly increasing and never reused; id 0 is reserved
//! for anonymous calls and never appears in the table.
//!
//! [`SessionSink`]: message_bus::SessionSink

mod error;
mod mailbox;
mod manager;
mod session;
mod sweep;
mod table;

pub use error::AuthError;
pub use mailbox::{MailboxEntry, PULL_BATCH};
pub use manager::{CallCredentials, LogonOptions, SessionConfig, SessionManager};
pub use session::Session;
pub use sweep::spawn_sweep;
pub use table::BindingKey;
