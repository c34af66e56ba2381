//! In-memory auth module.
//!
//! Authenticates against a fixed user table supplied at construction (or
//! deserialized from the host configuration). Meant for demos and tests; a
//! real deployment replaces it with a module backed by an actual user store.

use async_trait::async_trait;
use module_system::{
    AuthModule, HostContext, Module, ModuleError, ModuleParts, ModuleRegistration, OrgGroup,
    OrgGroupId, PermissionSet, Principal, SessionId,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

pub const MODULE_NAME: &str = "auth_memory";

/// One user in the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub login: String,
    pub credential: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default = "default_culture")]
    pub culture: String,
    #[serde(default)]
    pub org_group: u32,
    /// Concurrent-session cap for the user's org group, unlimited if absent.
    #[serde(default)]
    pub session_cap: Option<u32>,
    /// Account expiry as seconds since the Unix epoch.
    #[serde(default)]
    pub expires_unix_secs: Option<u64>,
    /// Source addresses this user may authenticate from without credentials.
    #[serde(default)]
    pub trusted_ips: Vec<IpAddr>,
}

fn default_culture() -> String {
    "en-US".to_string()
}

impl UserRecord {
    pub fn new(login: &str, credential: &str) -> Self {
        Self {
            login: login.to_string(),
            credential: credential.to_string(),
            permissions: Vec::new(),
            culture: default_culture(),
            org_group: 0,
            session_cap: None,
            expires_unix_secs: None,
            trusted_ips: Vec::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_org_group(mut self, group: u32, cap: Option<u32>) -> Self {
        self.org_group = group;
        self.session_cap = cap;
        self
    }

    pub fn with_trusted_ip(mut self, ip: IpAddr) -> Self {
        self.trusted_ips.push(ip);
        self
    }

    fn principal(&self) -> Principal {
        Principal {
            user_id: format!("mem-{}", self.login),
            login: self.login.clone(),
            permissions: self.permissions.iter().cloned().collect(),
            culture: self.culture.clone(),
            org_group: OrgGroup {
                id: OrgGroupId(self.org_group),
                session_cap: self.session_cap,
            },
            account_expires: self
                .expires_unix_secs
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }
}

/// The auth module itself. The user table is fixed after construction.
pub struct MemoryAuthModule {
    users: Vec<UserRecord>,
    sessions_created: AtomicU64,
}

impl MemoryAuthModule {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self {
            users,
            sessions_created: AtomicU64::new(0),
        }
    }

    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }

    fn find(&self, login: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.login == login)
    }
}

#[async_trait]
impl Module for MemoryAuthModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    async fn initialize(&self, _context: Arc<dyn HostContext>) -> Result<(), ModuleError> {
        info!(users = self.users.len(), "🔐 in-memory auth module ready");
        Ok(())
    }
}

#[async_trait]
impl AuthModule for MemoryAuthModule {
    async fn authenticate(
        &self,
        login: &str,
        credential: &str,
    ) -> Result<Option<Principal>, ModuleError> {
        Ok(self
            .find(login)
            .filter(|user| user.credential == credential)
            .map(UserRecord::principal))
    }

    async fn authenticate_by_ip(&self, ip: IpAddr) -> Result<Option<Principal>, ModuleError> {
        Ok(self
            .users
            .iter()
            .find(|user| user.trusted_ips.contains(&ip))
            .map(UserRecord::principal))
    }

    async fn authenticate_as(&self, user_id: &str) -> Result<Option<Principal>, ModuleError> {
        // Accepts either the synthetic user id or the bare login.
        Ok(self
            .users
            .iter()
            .find(|user| user.login == user_id || format!("mem-{}", user.login) == user_id)
            .map(UserRecord::principal))
    }

    async fn authorize(
        &self,
        principal: &Principal,
    ) -> Result<Option<PermissionSet>, ModuleError> {
        match self.find(&principal.login) {
            Some(user) => Ok(Some(user.permissions.iter().cloned().collect())),
            None => Ok(None),
        }
    }

    async fn on_session_created(
        &self,
        principal: &Principal,
        session: SessionId,
    ) -> Result<(), ModuleError> {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        debug!(login = %principal.login, %session, "session created");
        Ok(())
    }

    async fn on_session_deleted(&self, session: SessionId) -> Result<(), ModuleError> {
        debug!(%session, "session deleted");
        Ok(())
    }
}

/// Catalog registration for this module. Loads early so auth is available
/// before lower-priority modules come up.
pub fn registration(users: Vec<UserRecord>) -> ModuleRegistration {
    ModuleRegistration::new(MODULE_NAME, 100, move || {
        let module = Arc::new(MemoryAuthModule::new(users.clone()));
        ModuleParts {
            module: module.clone(),
            subscriber: None,
            auth: Some(module),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn module() -> MemoryAuthModule {
        MemoryAuthModule::new(vec![
            UserRecord::new("alice", "secret")
                .with_permissions(&["core.remote_access"])
                .with_org_group(3, Some(2)),
            UserRecord::new("kiosk", "")
                .with_trusted_ip(Ipv4Addr::new(10, 0, 0, 7).into()),
        ])
    }

    #[tokio::test]
    async fn credentials_resolve_to_principal_with_grants() {
        let auth = module();
        let principal = auth.authenticate("alice", "secret").await.unwrap().unwrap();
        assert_eq!(principal.login, "alice");
        assert!(principal.has_permission("core.remote_access"));
        assert_eq!(principal.org_group.id, OrgGroupId(3));
        assert_eq!(principal.org_group.session_cap, Some(2));

        assert!(auth.authenticate("alice", "wrong").await.unwrap().is_none());
        assert!(auth.authenticate("nobody", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trusted_ip_resolves_without_credentials() {
        let auth = module();
        let hit = auth
            .authenticate_by_ip(Ipv4Addr::new(10, 0, 0, 7).into())
            .await
            .unwrap();
        assert_eq!(hit.unwrap().login, "kiosk");

        let miss = auth
            .authenticate_by_ip(Ipv4Addr::new(10, 0, 0, 8).into())
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn expired_account_carries_its_expiry() {
        let mut user = UserRecord::new("old", "pw");
        user.expires_unix_secs = Some(1); // 1970
        let auth = MemoryAuthModule::new(vec![user]);

        let principal = auth.authenticate("old", "pw").await.unwrap().unwrap();
        assert!(principal.is_expired(SystemTime::now()));
    }

    #[test]
    fn user_record_deserializes_with_defaults() {
        let user: UserRecord = serde_json::from_str(
            r#"{ "login": "bob", "credential": "pw" }"#,
        )
        .unwrap();
        assert_eq!(user.culture, "en-US");
        assert!(user.permissions.is_empty());
        assert!(user.session_cap.is_none());
    }
}
