//! Core identifier and classification types shared across the host.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::SystemTime;

/// Unique session identifier.
///
/// Ids are allocated from a strictly increasing counter and never reused for
/// the lifetime of the process. Id 0 is reserved for anonymous/pre-auth calls
/// and never appears in the session table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct SessionId(pub u64);

impl SessionId {
    /// The reserved anonymous id attached to calls that have not
    /// authenticated yet.
    pub const ANONYMOUS: SessionId = SessionId(0);

    /// Returns true for the reserved pre-auth id.
    pub fn is_anonymous(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Organizational group identifier used for concurrent-session licensing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgGroupId(pub u32);

impl fmt::Display for OrgGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "org-{}", self.0)
    }
}

/// Organizational group membership carried by a [`Principal`].
///
/// The session cap is license data owned by the auth module, which is why it
/// rides on the principal rather than on host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgGroup {
    /// Group identifier.
    pub id: OrgGroupId,
    /// Maximum concurrent sessions for this group, `None` for unlimited.
    pub session_cap: Option<u32>,
}

/// How a call physically reached the server.
///
/// Assigned by the transport binding (out of scope here); the core only uses
/// it to select a trust model and to enforce transport-class permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportClass {
    /// Call originated inside the process (module-to-server, host tasks).
    InProcess,
    /// Standard remote transport.
    Http,
    /// Raw socket transport; requires a dedicated permission to use.
    RawSocket,
}

impl TransportClass {
    /// Permission a principal must hold to talk over this transport class,
    /// if the class is restricted.
    pub fn required_permission(&self) -> Option<&'static str> {
        match self {
            TransportClass::RawSocket => Some(permissions::RAW_SOCKET),
            TransportClass::InProcess | TransportClass::Http => None,
        }
    }
}

/// Trust model used to resolve a session for an inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustModel {
    /// No session context is attached at all.
    None,
    /// A session id travels with the call (cookie, header, query parameter).
    SessionId,
    /// The source IP alone identifies the caller.
    Ip,
    /// A transport-resolved login plus the source IP identify the caller.
    Login,
}

/// Coarse host lifecycle state guarding all inbound work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No modules loaded, no work accepted.
    Stopped,
    /// Module load sequence in progress.
    Starting,
    /// Normal operation.
    Started,
    /// Unload sequence in progress.
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Stopped => "Stopped",
            ServerState::Starting => "Starting",
            ServerState::Started => "Started",
            ServerState::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

/// Set of permission names held by a principal.
pub type PermissionSet = HashSet<String>;

/// Well-known permission names enforced by the core.
pub mod permissions {
    /// Required to open a session from a non-local address.
    pub const REMOTE_ACCESS: &str = "core.remote_access";
    /// Required to talk over the raw-socket transport class.
    pub const RAW_SOCKET: &str = "core.raw_socket";
}

/// Authenticated identity returned by an auth module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Stable user identifier within the auth module's domain.
    pub user_id: String,
    /// Login name the user authenticated with.
    pub login: String,
    /// Permissions granted by `authorize`.
    pub permissions: PermissionSet,
    /// Culture/locale tag for the user.
    pub culture: String,
    /// Organizational group, including the concurrent-session cap.
    pub org_group: OrgGroup,
    /// Account expiry; logons past this instant are rejected.
    pub account_expires: Option<SystemTime>,
}

impl Principal {
    /// Returns true once the account expiry has elapsed.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.account_expires.map(|at| now >= at).unwrap_or(false)
    }

    /// Checks for a single permission by name.
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.contains(name)
    }
}
