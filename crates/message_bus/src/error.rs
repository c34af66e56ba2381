//! Error types for bus operations.

use module_system::{GateError, ServerState};

/// Errors surfaced by bus operations to their callers.
///
/// Handler failures never appear here; they are contained at the worker
/// boundary and logged.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The operation is not valid in the current server state.
    #[error("bus rejected {operation} while server is {state}")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },

    /// The acting module is not a registered subscriber (or the call has no
    /// module attribution at all).
    #[error("module '{0}' is not a registered subscriber")]
    NotSubscriber(String),

    /// No subscription record exists for the module.
    #[error("no subscription for module '{0}'")]
    UnknownSubscription(String),

    /// Stale-reference failure from the call gate.
    #[error(transparent)]
    Gate(#[from] GateError),
}
