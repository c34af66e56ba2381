//! # Auth Module Capability
//!
//! Authentication is delegated to a module implementing [`AuthModule`]. The
//! session manager consumes this capability for every trust model: full
//! credential logons, IP-based and login-based resolution, authorization,
//! session restore on registration, and the session lifecycle hooks.

use crate::module::ModuleError;
use crate::types::{PermissionSet, Principal, SessionId};
use async_trait::async_trait;
use std::net::IpAddr;

/// A session persisted by an auth module across host restarts, reported by
/// [`AuthModule::restore_sessions`] so the host can re-seat it.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    /// Session id the auth module recorded for it; the host's id counter is
    /// advanced past the restored maximum so new ids stay strictly increasing.
    pub id: u64,
    /// Login that owned the session.
    pub login: String,
    /// Creation IP recorded for the session.
    pub ip: IpAddr,
    /// Principal to reinstate.
    pub principal: Principal,
}

/// Authentication capability implemented by a module.
///
/// Returning `Ok(None)` from an `authenticate*` method means "not my user" /
/// "credentials rejected" — a normal outcome, distinct from `Err`, which
/// signals a module failure and is logged as such.
#[async_trait]
pub trait AuthModule: Send + Sync {
    /// Full credential authentication for `logon`.
    async fn authenticate(
        &self,
        login: &str,
        credential: &str,
    ) -> Result<Option<Principal>, ModuleError>;

    /// Trust-by-source-address authentication for the IP trust model.
    async fn authenticate_by_ip(&self, ip: IpAddr) -> Result<Option<Principal>, ModuleError>;

    /// Impersonation by resolved user id, for `logon_as` and the Login trust
    /// model where the transport already established an identity.
    async fn authenticate_as(&self, user_id: &str) -> Result<Option<Principal>, ModuleError>;

    /// Resolves the permission set for an authenticated principal. `None`
    /// means the principal has no grants at all.
    async fn authorize(&self, principal: &Principal)
        -> Result<Option<PermissionSet>, ModuleError>;

    /// Sessions the module persisted before a restart; called once when the
    /// module is registered with the session manager.
    async fn restore_sessions(&self) -> Result<Vec<PersistedSession>, ModuleError> {
        Ok(Vec::new())
    }

    /// Notification that a session owned by this module was created.
    async fn on_session_created(
        &self,
        _principal: &Principal,
        _session: SessionId,
    ) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Notification that a session owned by this module was removed (expiry,
    /// logoff, or eviction).
    async fn on_session_deleted(&self, _session: SessionId) -> Result<(), ModuleError> {
        Ok(())
    }
}
