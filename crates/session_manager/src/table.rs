//! Concurrent session table and login-binding index.

use crate::session::Session;
use dashmap::DashMap;
use module_system::{OrgGroupId, SessionId};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Composite key used by the IP and Login trust models to find an existing
/// session without a session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingKey {
    Ip(IpAddr),
    IpLogin(IpAddr, String),
}

/// Session storage keyed by id, with a secondary binding index.
///
/// Ids come from a strictly increasing counter starting at 1 (0 is the
/// reserved anonymous id). Binding entries may go stale when their session is
/// removed; lookups treat that as a cache miss and clean up lazily.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    sessions: DashMap<SessionId, Arc<Session>>,
    bindings: DashMap<BindingKey, SessionId>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            bindings: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates the next session id. Never returns the anonymous id and
    /// never repeats.
    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Advances the counter past a restored id so future allocations stay
    /// strictly increasing.
    pub fn reserve_past(&self, id: u64) {
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
    }

    pub fn insert(&self, session: Arc<Session>) {
        debug_assert!(!session.id().is_anonymous());
        self.sessions.insert(session.id(), session);
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    pub fn bind(&self, key: BindingKey, id: SessionId) {
        self.bindings.insert(key, id);
    }

    /// Resolves a binding key to a live session. A binding pointing at a
    /// removed session is dropped and reported as a miss, not an error.
    pub fn resolve_binding(&self, key: &BindingKey) -> Option<Arc<Session>> {
        let id = self.bindings.get(key).map(|entry| *entry)?;
        match self.get(id) {
            Some(session) => Some(session),
            None => {
                self.bindings.remove(key);
                None
            }
        }
    }

    pub fn sessions_for_login(&self, login: &str) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().login() == login)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn count_for_group(&self, group: OrgGroupId) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().org_group().id == group)
            .count()
    }

    /// Snapshot of all live sessions, for the sweep.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use module_system::{OrgGroup, PermissionSet, Principal};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn principal(login: &str, group: u32) -> Principal {
        Principal {
            user_id: format!("u-{login}"),
            login: login.to_string(),
            permissions: PermissionSet::new(),
            culture: "en-US".to_string(),
            org_group: OrgGroup {
                id: OrgGroupId(group),
                session_cap: None,
            },
            account_expires: None,
        }
    }

    fn session(table: &SessionTable, login: &str, group: u32) -> Arc<Session> {
        let session = Arc::new(Session::new(
            table.allocate_id(),
            &principal(login, group),
            Ipv4Addr::LOCALHOST.into(),
            "auth",
            Duration::from_secs(60),
        ));
        table.insert(session.clone());
        session
    }

    #[test]
    fn ids_are_strictly_increasing_and_skip_anonymous() {
        let table = SessionTable::new();
        let mut last = 0;
        for _ in 0..100 {
            let id = table.allocate_id().0;
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn reserve_past_keeps_monotonicity_over_restored_ids() {
        let table = SessionTable::new();
        table.reserve_past(500);
        assert!(table.allocate_id().0 > 500);
        // Reserving backwards never rewinds the counter.
        table.reserve_past(10);
        assert!(table.allocate_id().0 > 500);
    }

    #[test]
    fn stale_binding_is_a_miss_and_gets_cleaned_up() {
        let table = SessionTable::new();
        let s = session(&table, "alice", 1);
        let key = BindingKey::Ip(Ipv4Addr::LOCALHOST.into());
        table.bind(key.clone(), s.id());

        assert!(table.resolve_binding(&key).is_some());

        table.remove(s.id());
        assert!(table.resolve_binding(&key).is_none());
        // Second lookup also misses without touching the removed id.
        assert!(table.resolve_binding(&key).is_none());
    }

    #[test]
    fn group_counting_and_login_lookup() {
        let table = SessionTable::new();
        session(&table, "alice", 1);
        session(&table, "alice", 1);
        session(&table, "bob", 2);

        assert_eq!(table.count_for_group(OrgGroupId(1)), 2);
        assert_eq!(table.count_for_group(OrgGroupId(2)), 1);
        assert_eq!(table.sessions_for_login("alice").len(), 2);
        assert_eq!(table.len(), 3);
    }
}
