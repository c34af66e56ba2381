//! The session manager: trust-model dispatch, logon policy, mailbox tap.

use crate::error::AuthError;
use crate::mailbox::MailboxEntry;
use crate::session::Session;
use crate::table::{BindingKey, SessionTable};
use dashmap::DashMap;
use message_bus::SessionSink;
use module_system::types::permissions;
use module_system::{
    AuthModule, CallContext, Principal, SessionId, ShutdownSignal, TrustModel,
};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Session-layer tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sliding expiration window applied on every refresh.
    pub session_ttl: Duration,
    /// Interval between expiration sweeps.
    pub sweep_interval: Duration,
    /// Default expiry window for buffered mailbox entries.
    pub mailbox_ttl: Duration,
    /// When true, a second logon for an active login is rejected unless the
    /// caller flags the attempt as a collision retry.
    pub exclusive_login: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(30),
            mailbox_ttl: Duration::from_secs(5 * 60),
            exclusive_login: true,
        }
    }
}

/// Material extracted from an inbound call by the transport binding.
#[derive(Debug, Clone, Default)]
pub struct CallCredentials {
    /// Session id found in a cookie, header, or query parameter.
    pub session_id: Option<SessionId>,
    /// Login resolved by the transport (client certificate, OS identity).
    pub login: Option<String>,
    /// True when the call targets a login/entry endpoint, which is allowed
    /// through anonymously under the SessionId trust model.
    pub entry_point: bool,
}

/// Options for explicit logon operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogonOptions {
    /// Flags a retry after a login collision; prior sessions for the login
    /// are evicted instead of rejecting the attempt.
    pub collision_retry: bool,
}

type SubscriberSet = Arc<RwLock<HashSet<SessionId>>>;

/// The session and authentication manager.
pub struct SessionManager {
    table: SessionTable,
    auth_modules: DashMap<String, Arc<dyn AuthModule>>,
    /// Message-type name -> sessions subscribed for mailbox delivery.
    client_subs: DashMap<String, SubscriberSet>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            table: SessionTable::new(),
            auth_modules: DashMap::new(),
            client_subs: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.table.len()
    }

    pub fn get_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.table.get(id)
    }

    /// Looks up a session and slides its expiry, the way every successful
    /// authentication lookup does.
    pub fn resolve(&self, id: SessionId) -> Option<Arc<Session>> {
        let session = self.table.get(id)?;
        session.refresh();
        Some(session)
    }

    // ------------------------------------------------------------------
    // Auth module wiring
    // ------------------------------------------------------------------

    /// Registers an auth module and re-seats any sessions it persisted.
    pub async fn register_auth_module(&self, name: &str, module: Arc<dyn AuthModule>) {
        match module.restore_sessions().await {
            Ok(persisted) => {
                let restored = persisted.len();
                for entry in persisted {
                    self.table.reserve_past(entry.id);
                    let id = SessionId(entry.id);
                    let session = Arc::new(Session::new(
                        id,
                        &entry.principal,
                        entry.ip,
                        name,
                        self.config.session_ttl,
                    ));
                    self.table.insert(session);
                    self.table.bind(BindingKey::Ip(entry.ip), id);
                    self.table
                        .bind(BindingKey::IpLogin(entry.ip, entry.login.clone()), id);
                }
                if restored > 0 {
                    info!(module = %name, restored, "restored persisted sessions");
                }
            }
            Err(err) => {
                error!(module = %name, "session restore failed: {err}");
            }
        }
        self.auth_modules.insert(name.to_string(), module);
        info!(module = %name, "auth module registered");
    }

    /// Removes an auth module and drops the sessions it owns. The deletion
    /// hook is not invoked here; the module is going away.
    pub fn deregister_auth_module(&self, name: &str) {
        if self.auth_modules.remove(name).is_none() {
            return;
        }
        let mut dropped = 0usize;
        for session in self.table.snapshot() {
            if session.auth_module() == name {
                if self.table.remove(session.id()).is_some() {
                    self.forget_session(&session);
                    dropped += 1;
                }
            }
        }
        info!(module = %name, dropped, "auth module deregistered");
    }

    // ------------------------------------------------------------------
    // Trust-model dispatch
    // ------------------------------------------------------------------

    /// Resolves or creates the session for an inbound call and returns the
    /// context tagged with it.
    pub async fn authenticate_call(
        &self,
        ctx: &CallContext,
        trust: TrustModel,
        credentials: &CallCredentials,
    ) -> Result<CallContext, AuthError> {
        match trust {
            TrustModel::None => Ok(ctx.clone()),

            TrustModel::SessionId => match credentials.session_id {
                Some(id) if !id.is_anonymous() => {
                    let session = self.resolve(id).ok_or(AuthError::UnknownSession(id))?;
                    Ok(ctx.clone().with_session(session.id()))
                }
                _ if credentials.entry_point => Ok(ctx.clone()),
                _ => Err(AuthError::NotLoggedOn),
            },

            TrustModel::Ip => {
                let ip = ctx.remote_addr.ok_or(AuthError::NotLoggedOn)?;
                let key = BindingKey::Ip(ip);
                if let Some(session) = self.table.resolve_binding(&key) {
                    session.refresh();
                    return Ok(ctx.clone().with_session(session.id()));
                }

                let (name, auth, principal) = self.principal_by_ip(ip).await?;
                self.reuse_or_activate(key, &name, auth, principal, ctx).await
            }

            TrustModel::Login => {
                let ip = ctx.remote_addr.ok_or(AuthError::NotLoggedOn)?;
                let login = credentials.login.clone().ok_or(AuthError::NotLoggedOn)?;
                let key = BindingKey::IpLogin(ip, login.clone());
                if let Some(session) = self.table.resolve_binding(&key) {
                    session.refresh();
                    return Ok(ctx.clone().with_session(session.id()));
                }

                let (name, auth, principal) = self.principal_as(&login).await?;
                self.reuse_or_activate(key, &name, auth, principal, ctx).await
            }
        }
    }

    /// Binding missed and authentication ran; a concurrent call may have
    /// seated a session for the same key in the meantime, in which case the
    /// existing session is reused with refreshed grants.
    async fn reuse_or_activate(
        &self,
        key: BindingKey,
        module_name: &str,
        auth: Arc<dyn AuthModule>,
        principal: Principal,
        ctx: &CallContext,
    ) -> Result<CallContext, AuthError> {
        if let Some(session) = self.table.resolve_binding(&key) {
            let grants = auth.authorize(&principal).await?.unwrap_or_default();
            session.update_grants(grants, principal.culture.clone());
            session.refresh();
            return Ok(ctx.clone().with_session(session.id()));
        }
        let session = self.activate(module_name, auth, principal, ctx, false).await?;
        Ok(ctx.clone().with_session(session.id()))
    }

    // ------------------------------------------------------------------
    // Explicit logon operations
    // ------------------------------------------------------------------

    /// Full credential logon.
    pub async fn logon(
        &self,
        ctx: &CallContext,
        login: &str,
        credential: &str,
        options: LogonOptions,
    ) -> Result<Arc<Session>, AuthError> {
        let (name, auth, principal) = self.principal_by_credentials(login, credential).await?;
        self.activate(&name, auth, principal, ctx, options.collision_retry)
            .await
    }

    /// Impersonation logon by resolved user id.
    pub async fn logon_as(
        &self,
        ctx: &CallContext,
        user_id: &str,
        options: LogonOptions,
    ) -> Result<Arc<Session>, AuthError> {
        let (name, auth, principal) = self.principal_as(user_id).await?;
        self.activate(&name, auth, principal, ctx, options.collision_retry)
            .await
    }

    /// Logon for an identity the transport already verified.
    pub async fn trusted_logon(
        &self,
        ctx: &CallContext,
        login: &str,
        options: LogonOptions,
    ) -> Result<Arc<Session>, AuthError> {
        let (name, auth, principal) = self.principal_as(login).await?;
        self.activate(&name, auth, principal, ctx, options.collision_retry)
            .await
    }

    /// Explicit logoff; removes the session and fires the deletion hook.
    pub async fn logoff(&self, id: SessionId) -> Result<(), AuthError> {
        let session = self.table.remove(id).ok_or(AuthError::UnknownSession(id))?;
        self.forget_session(&session);
        self.notify_deleted(&session).await;
        info!(session = %id, login = %session.login(), "session logged off");
        Ok(())
    }

    /// Policy-checked session activation, shared by every creation path.
    ///
    /// Prior sessions for the same login are evicted *synchronously* before
    /// the new session is seated, so two sessions for one login never coexist
    /// (a deliberate tightening of the historical fire-and-forget eviction).
    async fn activate(
        &self,
        module_name: &str,
        auth: Arc<dyn AuthModule>,
        mut principal: Principal,
        ctx: &CallContext,
        collision_retry: bool,
    ) -> Result<Arc<Session>, AuthError> {
        if principal.is_expired(SystemTime::now()) {
            return Err(AuthError::AccountExpired(principal.login.clone()));
        }

        principal.permissions = auth.authorize(&principal).await?.unwrap_or_default();

        if let Some(permission) = ctx.transport.required_permission() {
            if !principal.has_permission(permission) {
                return Err(AuthError::TransportDenied {
                    transport: ctx.transport,
                    permission,
                });
            }
        }
        if !ctx.is_local() && !principal.has_permission(permissions::REMOTE_ACCESS) {
            return Err(AuthError::RemoteAccessDenied);
        }

        let existing = self.table.sessions_for_login(&principal.login);
        if !existing.is_empty() {
            if self.config.exclusive_login && !collision_retry {
                return Err(AuthError::LoginCollision(principal.login.clone()));
            }
            for session in existing {
                warn!(
                    session = %session.id(),
                    login = %principal.login,
                    "evicting prior session for login"
                );
                if self.table.remove(session.id()).is_some() {
                    self.forget_session(&session);
                    self.notify_deleted(&session).await;
                }
            }
        }

        if let Some(cap) = principal.org_group.session_cap {
            if self.table.count_for_group(principal.org_group.id) >= cap as usize {
                return Err(AuthError::SessionCapExceeded(principal.org_group.id));
            }
        }

        let ip = ctx
            .remote_addr
            .unwrap_or_else(|| IpAddr::V4(Ipv4Addr::LOCALHOST));
        let id = self.table.allocate_id();
        let session = Arc::new(Session::new(
            id,
            &principal,
            ip,
            module_name,
            self.config.session_ttl,
        ));
        self.table.insert(session.clone());
        self.table.bind(BindingKey::Ip(ip), id);
        self.table
            .bind(BindingKey::IpLogin(ip, principal.login.clone()), id);

        if let Err(err) = auth.on_session_created(&principal, id).await {
            error!(session = %id, module = %module_name, "session-created hook failed: {err}");
        }
        info!(session = %id, login = %principal.login, %ip, "session created");
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Principal resolution across registered auth modules
    // ------------------------------------------------------------------

    fn auth_entries(&self) -> Vec<(String, Arc<dyn AuthModule>)> {
        self.auth_modules
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    async fn principal_by_credentials(
        &self,
        login: &str,
        credential: &str,
    ) -> Result<(String, Arc<dyn AuthModule>, Principal), AuthError> {
        let entries = self.auth_entries();
        if entries.is_empty() {
            return Err(AuthError::NoAuthModule);
        }
        for (name, auth) in entries {
            match auth.authenticate(login, credential).await {
                Ok(Some(principal)) => return Ok((name, auth, principal)),
                Ok(None) => continue,
                Err(err) => error!(module = %name, "authenticate failed: {err}"),
            }
        }
        Err(AuthError::InvalidCredentials)
    }

    async fn principal_by_ip(
        &self,
        ip: IpAddr,
    ) -> Result<(String, Arc<dyn AuthModule>, Principal), AuthError> {
        let entries = self.auth_entries();
        if entries.is_empty() {
            return Err(AuthError::NoAuthModule);
        }
        for (name, auth) in entries {
            match auth.authenticate_by_ip(ip).await {
                Ok(Some(principal)) => return Ok((name, auth, principal)),
                Ok(None) => continue,
                Err(err) => error!(module = %name, "authenticate_by_ip failed: {err}"),
            }
        }
        Err(AuthError::InvalidCredentials)
    }

    async fn principal_as(
        &self,
        user_id: &str,
    ) -> Result<(String, Arc<dyn AuthModule>, Principal), AuthError> {
        let entries = self.auth_entries();
        if entries.is_empty() {
            return Err(AuthError::NoAuthModule);
        }
        for (name, auth) in entries {
            match auth.authenticate_as(user_id).await {
                Ok(Some(principal)) => return Ok((name, auth, principal)),
                Ok(None) => continue,
                Err(err) => error!(module = %name, "authenticate_as failed: {err}"),
            }
        }
        Err(AuthError::InvalidCredentials)
    }

    // ------------------------------------------------------------------
    // Mailbox subscriptions and pull
    // ------------------------------------------------------------------

    /// Subscribes a session to a message type name for mailbox delivery.
    pub fn subscribe_session(&self, id: SessionId, type_name: &str) -> Result<(), AuthError> {
        if self.table.get(id).is_none() {
            return Err(AuthError::UnknownSession(id));
        }
        self.client_subs
            .entry(type_name.to_string())
            .or_default()
            .write()
            .expect("client subscription lock poisoned")
            .insert(id);
        Ok(())
    }

    pub fn unsubscribe_session(&self, id: SessionId, type_name: &str) {
        if let Some(set) = self.client_subs.get(type_name) {
            set.write()
                .expect("client subscription lock poisoned")
                .remove(&id);
        }
    }

    /// Pull protocol: acknowledges everything at or below `last_seen`, then
    /// returns the next batch. The call counts as a successful lookup, so it
    /// refreshes the session.
    pub fn pull(&self, id: SessionId, last_seen: u64) -> Result<Vec<MailboxEntry>, AuthError> {
        let session = self.resolve(id).ok_or(AuthError::UnknownSession(id))?;
        Ok(session.mailbox_pull(last_seen))
    }

    fn forget_session(&self, session: &Session) {
        for entry in self.client_subs.iter() {
            entry
                .value()
                .write()
                .expect("client subscription lock poisoned")
                .remove(&session.id());
        }
    }

    async fn notify_deleted(&self, session: &Session) {
        let auth = self
            .auth_modules
            .get(session.auth_module())
            .map(|entry| entry.value().clone());
        if let Some(auth) = auth {
            if let Err(err) = auth.on_session_deleted(session.id()).await {
                error!(
                    session = %session.id(),
                    module = %session.auth_module(),
                    "session-deleted hook failed: {err}"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Expiration sweep
    // ------------------------------------------------------------------

    /// One sweep pass: removes sessions past their sliding expiry and prunes
    /// expired mailbox entries from the survivors. Yields between batches and
    /// honors the shutdown signal mid-pass. Returns (sessions removed,
    /// mailbox entries pruned).
    pub async fn sweep_once(&self, shutdown: Option<&ShutdownSignal>) -> (usize, usize) {
        let now = Instant::now();
        let mut removed = 0usize;
        let mut pruned = 0usize;

        for (index, session) in self.table.snapshot().into_iter().enumerate() {
            if let Some(signal) = shutdown {
                if signal.is_triggered() {
                    break;
                }
            }
            if session.is_expired(now) {
                if self.table.remove(session.id()).is_some() {
                    removed += 1;
                    self.forget_session(&session);
                    self.notify_deleted(&session).await;
                    debug!(session = %session.id(), login = %session.login(), "expired session removed");
                }
            } else {
                pruned += session.mailbox_prune(now);
            }
            if index % 64 == 63 {
                tokio::task::yield_now().await;
            }
        }

        if removed > 0 || pruned > 0 {
            debug!(removed, pruned, "expiration sweep pass complete");
        }
        (removed, pruned)
    }
}

impl SessionSink for SessionManager {
    fn deliver(&self, type_name: &str, payload: serde_json::Value) {
        let Some(set) = self.client_subs.get(type_name).map(|s| s.clone()) else {
            return;
        };
        let ids: Vec<SessionId> = set
            .read()
            .expect("client subscription lock poisoned")
            .iter()
            .copied()
            .collect();
        for id in ids {
            if let Some(session) = self.table.get(id) {
                session.mailbox_push(type_name, payload.clone(), self.config.mailbox_ttl);
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.table.len())
            .field("auth_modules", &self.auth_modules.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use module_system::{
        async_trait, ModuleError, OrgGroup, OrgGroupId, PermissionSet, PersistedSession,
        TransportClass,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Auth module fixture with a fixed user set and recorded hook calls.
    struct StubAuth {
        users: Vec<(String, String, Principal)>,
        trusted_ips: Vec<IpAddr>,
        persisted: Vec<PersistedSession>,
        created: AtomicUsize,
        deleted: AtomicUsize,
    }

    impl StubAuth {
        fn new(users: Vec<(String, String, Principal)>) -> Self {
            Self {
                users,
                trusted_ips: Vec::new(),
                persisted: Vec::new(),
                created: AtomicUsize::new(0),
                deleted: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AuthModule for StubAuth {
        async fn authenticate(
            &self,
            login: &str,
            credential: &str,
        ) -> Result<Option<Principal>, ModuleError> {
            Ok(self
                .users
                .iter()
                .find(|(l, c, _)| l == login && c == credential)
                .map(|(_, _, p)| p.clone()))
        }

        async fn authenticate_by_ip(&self, ip: IpAddr) -> Result<Option<Principal>, ModuleError> {
            if self.trusted_ips.contains(&ip) {
                Ok(self.users.first().map(|(_, _, p)| p.clone()))
            } else {
                Ok(None)
            }
        }

        async fn authenticate_as(&self, user_id: &str) -> Result<Option<Principal>, ModuleError> {
            Ok(self
                .users
                .iter()
                .find(|(l, _, p)| l == user_id || p.user_id == user_id)
                .map(|(_, _, p)| p.clone()))
        }

        async fn authorize(
            &self,
            principal: &Principal,
        ) -> Result<Option<PermissionSet>, ModuleError> {
            Ok(Some(principal.permissions.clone()))
        }

        async fn restore_sessions(&self) -> Result<Vec<PersistedSession>, ModuleError> {
            Ok(self.persisted.clone())
        }

        async fn on_session_created(
            &self,
            _principal: &Principal,
            _session: SessionId,
        ) -> Result<(), ModuleError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_session_deleted(&self, _session: SessionId) -> Result<(), ModuleError> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn principal(login: &str, group: u32, cap: Option<u32>, perms: &[&str]) -> Principal {
        Principal {
            user_id: format!("u-{login}"),
            login: login.to_string(),
            permissions: perms.iter().map(|p| p.to_string()).collect(),
            culture: "en-US".to_string(),
            org_group: OrgGroup {
                id: OrgGroupId(group),
                session_cap: cap,
            },
            account_expires: None,
        }
    }

    fn local_ctx() -> CallContext {
        CallContext::inbound(Ipv4Addr::LOCALHOST.into(), TransportClass::Http)
    }

    async fn manager_with(users: Vec<(String, String, Principal)>) -> (SessionManager, Arc<StubAuth>) {
        let auth = Arc::new(StubAuth::new(users));
        let manager = SessionManager::new(SessionConfig::default());
        manager.register_auth_module("auth_stub", auth.clone()).await;
        (manager, auth)
    }

    fn alice() -> (String, String, Principal) {
        (
            "alice".to_string(),
            "secret".to_string(),
            principal("alice", 1, None, &[]),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logon_creates_session_and_fires_hook() {
        let (manager, auth) = manager_with(vec![alice()]).await;

        let session = manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .expect("logon should succeed");
        assert_eq!(session.login(), "alice");
        assert!(!session.id().is_anonymous());
        assert_eq!(auth.created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_credentials_are_rejected() {
        let (manager, _) = manager_with(vec![alice()]).await;
        let err = manager
            .logon(&local_ctx(), "alice", "wrong", LogonOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_account_is_rejected() {
        let mut user = alice();
        user.2.account_expires = Some(SystemTime::now() - Duration::from_secs(60));
        let (manager, _) = manager_with(vec![user]).await;

        let err = manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountExpired(login) if login == "alice"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_caller_needs_remote_access_permission() {
        let (manager, _) = manager_with(vec![alice()]).await;
        let remote = CallContext::inbound(
            Ipv4Addr::new(203, 0, 113, 5).into(),
            TransportClass::Http,
        );

        let err = manager
            .logon(&remote, "alice", "secret", LogonOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RemoteAccessDenied));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn raw_socket_transport_needs_its_permission() {
        let (manager, _) = manager_with(vec![alice()]).await;
        let raw = CallContext::inbound(Ipv4Addr::LOCALHOST.into(), TransportClass::RawSocket);

        let err = manager
            .logon(&raw, "alice", "secret", LogonOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TransportDenied { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn org_group_cap_yields_licensing_error() {
        // Scenario: cap 1 for the group, two different logins in it.
        let users = vec![
            (
                "alice".to_string(),
                "secret".to_string(),
                principal("alice", 7, Some(1), &[]),
            ),
            (
                "bob".to_string(),
                "hunter2".to_string(),
                principal("bob", 7, Some(1), &[]),
            ),
        ];
        let (manager, _) = manager_with(users).await;

        manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .expect("first session fits under the cap");
        let err = manager
            .logon(&local_ctx(), "bob", "hunter2", LogonOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionCapExceeded(OrgGroupId(7))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exclusive_login_rejects_then_retry_evicts_synchronously() {
        let (manager, auth) = manager_with(vec![alice()]).await;

        let first = manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .unwrap();

        let err = manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LoginCollision(login) if login == "alice"));

        let second = manager
            .logon(
                &local_ctx(),
                "alice",
                "secret",
                LogonOptions {
                    collision_retry: true,
                },
            )
            .await
            .unwrap();

        // The prior session is gone before the new one is visible.
        assert!(manager.get_session(first.id()).is_none());
        assert!(manager.get_session(second.id()).is_some());
        assert_eq!(manager.session_count(), 1);
        assert!(second.id() > first.id());
        assert_eq!(auth.deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_ids_are_never_reused() {
        let (manager, _) = manager_with(vec![alice()]).await;
        let mut last = SessionId(0);
        for _ in 0..5 {
            let session = manager
                .logon(
                    &local_ctx(),
                    "alice",
                    "secret",
                    LogonOptions {
                        collision_retry: true,
                    },
                )
                .await
                .unwrap();
            assert!(session.id() > last);
            last = session.id();
            manager.logoff(session.id()).await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_id_trust_model_refreshes_or_rejects() {
        let (manager, _) = manager_with(vec![alice()]).await;
        let session = manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .unwrap();

        let resolved = manager
            .authenticate_call(
                &local_ctx(),
                TrustModel::SessionId,
                &CallCredentials {
                    session_id: Some(session.id()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(resolved.session, session.id());

        let err = manager
            .authenticate_call(
                &local_ctx(),
                TrustModel::SessionId,
                &CallCredentials::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotLoggedOn));

        // Entry points stay reachable anonymously.
        let anon = manager
            .authenticate_call(
                &local_ctx(),
                TrustModel::SessionId,
                &CallCredentials {
                    entry_point: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(anon.session.is_anonymous());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ip_trust_model_reuses_bound_session() {
        let auth = Arc::new(StubAuth {
            users: vec![alice()],
            trusted_ips: vec![Ipv4Addr::LOCALHOST.into()],
            persisted: Vec::new(),
            created: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
        });
        let manager = SessionManager::new(SessionConfig::default());
        manager.register_auth_module("auth_stub", auth.clone()).await;

        let first = manager
            .authenticate_call(&local_ctx(), TrustModel::Ip, &CallCredentials::default())
            .await
            .unwrap();
        assert!(!first.session.is_anonymous());

        let second = manager
            .authenticate_call(&local_ctx(), TrustModel::Ip, &CallCredentials::default())
            .await
            .unwrap();
        assert_eq!(first.session, second.session);
        assert_eq!(manager.session_count(), 1);
        assert_eq!(auth.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_removes_only_expired_sessions() {
        let (manager, auth) = manager_with(vec![alice()]).await;
        let session = manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .unwrap();

        let (removed, _) = manager.sweep_once(None).await;
        assert_eq!(removed, 0);

        session.force_expire();
        let (removed, _) = manager.sweep_once(None).await;
        assert_eq!(removed, 1);
        assert!(manager.get_session(session.id()).is_none());
        assert_eq!(auth.deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_strictly_extends_expiry() {
        let (manager, _) = manager_with(vec![alice()]).await;
        let session = manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .unwrap();

        session.force_expire();
        assert!(session.is_expired(Instant::now()));
        manager.resolve(session.id()).unwrap();
        assert!(!session.is_expired(Instant::now()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mailbox_delivery_and_idempotent_pull() {
        let (manager, _) = manager_with(vec![alice()]).await;
        let session = manager
            .logon(&local_ctx(), "alice", "secret", LogonOptions::default())
            .await
            .unwrap();
        manager
            .subscribe_session(session.id(), "notice.updated")
            .unwrap();

        manager.deliver("notice.updated", serde_json::json!({ "rev": 1 }));
        manager.deliver("notice.updated", serde_json::json!({ "rev": 2 }));
        manager.deliver("notice.ignored", serde_json::json!({}));

        let batch = manager.pull(session.id(), 0).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, serde_json::json!({ "rev": 1 }));

        // Acknowledge the first, pull again twice with the same cursor.
        let batch = manager.pull(session.id(), batch[0].id).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, serde_json::json!({ "rev": 2 }));
        let again = manager.pull(session.id(), batch[0].id - 1).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, batch[0].id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restored_sessions_keep_id_allocation_monotonic() {
        let mut auth = StubAuth::new(vec![alice()]);
        auth.persisted = vec![PersistedSession {
            id: 41,
            login: "alice".to_string(),
            ip: Ipv4Addr::LOCALHOST.into(),
            principal: principal("alice", 1, None, &[]),
        }];
        let auth = Arc::new(auth);
        let manager = SessionManager::new(SessionConfig::default());
        manager.register_auth_module("auth_stub", auth).await;

        assert_eq!(manager.session_count(), 1);
        assert!(manager.get_session(SessionId(41)).is_some());

        let session = manager
            .logon(
                &local_ctx(),
                "alice",
                "secret",
                LogonOptions {
                    collision_retry: true,
                },
            )
            .await
            .unwrap();
        assert!(session.id().0 > 41);
    }
}
