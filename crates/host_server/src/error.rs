//! Server-level errors.

use module_system::{ModuleError, ServerState};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Operation attempted outside its valid server state.
    #[error("cannot {operation} while server is {state}")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },

    /// A module with the same name is already loaded.
    #[error("module '{0}' is already loaded")]
    DuplicateModule(String),

    /// Another host instance is active and not Stopped. Fatal configuration
    /// error per the process-wide singleton rule.
    #[error("another host instance is already active")]
    InstanceAlreadyActive,

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Module(#[from] ModuleError),
}
