//! # Module Lifecycle Interface
//!
//! A module is an independently registered unit of server functionality with
//! a host-driven lifecycle:
//!
//! 1. **Creation** - instance constructed by its catalog registration
//! 2. **Initialize** - setup with host context, bounded by a timeout
//! 3. **Post-initialize** - cross-module wiring after every module is up
//! 4. **Pre-uninitialize** - early teardown notice while everything is live
//! 5. **Uninitialize** - final cleanup, bounded by the unload timeout
//!
//! Lifecycle calls are dispatched by the lifecycle manager as separate units
//! of work; a module that overruns its timeout is recorded as a failure but
//! never blocks the host indefinitely. Modules therefore must tolerate a
//! lifecycle future being dropped mid-flight.

use crate::context::HostContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Core lifecycle trait implemented by every module.
///
/// All methods take `&self`; modules own their interior mutability, since a
/// lifecycle call may run on a different task than the orchestrator.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Stable, unique module name. Used for the live list, gating, logging,
    /// and bus subscriptions.
    fn name(&self) -> &str;

    /// Optional override for this module's initialize timeout. `None` uses
    /// the host default.
    fn init_timeout(&self) -> Option<Duration> {
        None
    }

    /// Main setup phase. Failure removes the module from the host again and
    /// propagates to the loader.
    async fn initialize(&self, context: Arc<dyn HostContext>) -> Result<(), ModuleError>;

    /// Runs after the whole load sequence, once all modules are in the live
    /// list. Failures are logged and mark startup as not fully successful.
    async fn post_initialize(&self, _context: Arc<dyn HostContext>) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Runs before any module starts unloading, while every module is still
    /// live. Failures are logged; unload proceeds regardless.
    async fn pre_uninitialize(&self, _context: Arc<dyn HostContext>) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Final cleanup. Failures are logged; unload proceeds regardless.
    async fn uninitialize(&self, _context: Arc<dyn HostContext>) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Errors produced by module code.
///
/// The host wraps these with module and phase context before logging; only
/// `initialize` failures propagate beyond the lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Module failed to initialize during startup.
    #[error("module initialization failed: {0}")]
    Initialization(String),
    /// Error during normal operation (message handling, auth callbacks).
    #[error("module execution error: {0}")]
    Execution(String),
    /// A module or capability the caller asked for does not exist.
    #[error("module not found: {0}")]
    NotFound(String),
    /// Unexpected runtime condition.
    #[error("module runtime error: {0}")]
    Runtime(String),
    /// A gated call involved a module that is no longer loaded. Kept as its
    /// own kind so retry logic can tell it apart from business errors.
    #[error(transparent)]
    Gate(#[from] crate::gate::GateError),
}
