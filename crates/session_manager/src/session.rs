//! A single authenticated client conversation.

use crate::mailbox::{Mailbox, MailboxEntry};
use module_system::{OrgGroup, PermissionSet, Principal, SessionId};
use std::net::IpAddr;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

/// Server-side state for one session.
///
/// Owned exclusively by the session table while alive. Expiry is sliding:
/// every successful authentication lookup calls [`Session::refresh`].
/// Permissions and culture can change when the same login re-authenticates;
/// identity fields are fixed at creation.
pub struct Session {
    id: SessionId,
    login: String,
    created_ip: IpAddr,
    /// Name of the auth module that owns this session's lifecycle hooks.
    auth_module: String,
    org_group: OrgGroup,
    permissions: RwLock<PermissionSet>,
    culture: RwLock<String>,
    ttl: Duration,
    expires_at: Mutex<Instant>,
    mailbox: Mutex<Mailbox>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        principal: &Principal,
        created_ip: IpAddr,
        auth_module: &str,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            login: principal.login.clone(),
            created_ip,
            auth_module: auth_module.to_string(),
            org_group: principal.org_group.clone(),
            permissions: RwLock::new(principal.permissions.clone()),
            culture: RwLock::new(principal.culture.clone()),
            ttl,
            expires_at: Mutex::new(Instant::now() + ttl),
            mailbox: Mutex::new(Mailbox::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn created_ip(&self) -> IpAddr {
        self.created_ip
    }

    pub fn auth_module(&self) -> &str {
        &self.auth_module
    }

    pub fn org_group(&self) -> &OrgGroup {
        &self.org_group
    }

    pub fn culture(&self) -> String {
        self.culture.read().expect("culture lock poisoned").clone()
    }

    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions
            .read()
            .expect("permissions lock poisoned")
            .contains(name)
    }

    /// Slides the expiry forward to now + ttl.
    pub fn refresh(&self) {
        *self.expires_at.lock().expect("expiry lock poisoned") = Instant::now() + self.ttl;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= *self.expires_at.lock().expect("expiry lock poisoned")
    }

    /// Applies updated grants on re-login by the same user.
    pub(crate) fn update_grants(&self, permissions: PermissionSet, culture: String) {
        *self.permissions.write().expect("permissions lock poisoned") = permissions;
        *self.culture.write().expect("culture lock poisoned") = culture;
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&self) {
        *self.expires_at.lock().expect("expiry lock poisoned") =
            Instant::now() - Duration::from_secs(1);
    }

    pub(crate) fn mailbox_push(
        &self,
        type_name: &str,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> u64 {
        self.mailbox
            .lock()
            .expect("mailbox lock poisoned")
            .push(type_name, payload, Instant::now() + ttl)
    }

    pub(crate) fn mailbox_pull(&self, last_seen: u64) -> Vec<MailboxEntry> {
        self.mailbox
            .lock()
            .expect("mailbox lock poisoned")
            .pull(last_seen, Instant::now())
    }

    pub(crate) fn mailbox_prune(&self, now: Instant) -> usize {
        self.mailbox.lock().expect("mailbox lock poisoned").prune(now)
    }

    pub fn mailbox_len(&self) -> usize {
        self.mailbox.lock().expect("mailbox lock poisoned").len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("login", &self.login)
            .field("created_ip", &self.created_ip)
            .field("auth_module", &self.auth_module)
            .finish_non_exhaustive()
    }
}
