//! Client-visible authentication and authorization errors.
//!
//! Each variant is a distinct error kind; none of them is ever silently
//! downgraded before reaching the caller.

use module_system::{ModuleError, OrgGroupId, TransportClass};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The call carried no usable session and did not target an entry point.
    #[error("not logged on")]
    NotLoggedOn,

    /// No auth module accepted the presented credentials.
    #[error("invalid login or credential")]
    InvalidCredentials,

    /// The account's expiry date has passed.
    #[error("account expired for login '{0}'")]
    AccountExpired(String),

    /// The org group's concurrent-session license cap is exhausted.
    #[error("concurrent session cap reached for {0}")]
    SessionCapExceeded(OrgGroupId),

    /// Non-local caller without the remote-access permission.
    #[error("remote access permission required")]
    RemoteAccessDenied,

    /// The transport class the call arrived over requires a permission the
    /// principal does not hold.
    #[error("transport {transport:?} requires permission '{permission}'")]
    TransportDenied {
        transport: TransportClass,
        permission: &'static str,
    },

    /// Exclusive-login mode and another session is active for the login.
    #[error("another session is already active for login '{0}'")]
    LoginCollision(String),

    /// No auth module is registered with the session manager.
    #[error("no auth module available")]
    NoAuthModule,

    /// The referenced session does not exist (expired or never created).
    #[error("unknown session {0}")]
    UnknownSession(module_system::SessionId),

    /// An auth module failed while handling the request.
    #[error("auth module failure: {0}")]
    Module(#[from] ModuleError),
}
