//! Coarse server state cell.

use crate::error::ServerError;
use message_bus::ServerStateProbe;
use module_system::ServerState;
use std::sync::RwLock;
use tracing::info;

/// Shared Stopped/Starting/Started/Stopping cell guarding all inbound work.
///
/// Transitions are compare-and-set: the expected source state must hold or
/// the transition fails with an invalid-state error.
#[derive(Debug)]
pub struct StateCell {
    state: RwLock<ServerState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ServerState::Stopped),
        }
    }

    pub fn current(&self) -> ServerState {
        *self.state.read().expect("server state lock poisoned")
    }

    /// Moves `from` -> `to`, failing when the cell is not in `from`.
    pub fn transition(
        &self,
        operation: &'static str,
        from: ServerState,
        to: ServerState,
    ) -> Result<(), ServerError> {
        let mut state = self.state.write().expect("server state lock poisoned");
        if *state != from {
            return Err(ServerError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        info!(from = %from, to = %to, "server state transition");
        Ok(())
    }

    /// Unconditional reset, used only by the fatal-startup recovery path.
    pub fn force(&self, to: ServerState) {
        *self.state.write().expect("server state lock poisoned") = to;
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStateProbe for StateCell {
    fn current(&self) -> ServerState {
        StateCell::current(self)
    }
}
