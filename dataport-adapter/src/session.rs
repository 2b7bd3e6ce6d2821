//! Session-expiry classification and the session store collaborator

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tracing::warn;

use dataport_common::error::TransportError;
use dataport_common::types::AuthUser;

/// PostgREST code for a rejected or expired JWT
pub const JWT_ERROR_CODE: &str = "PGRST301";

/// Message fragment reported by GoTrue and PostgREST for stale tokens
pub const JWT_EXPIRED_MESSAGE: &str = "JWT expired";

/// The parts of a backend error that decide whether the session is gone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthErrorSignal {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl AuthErrorSignal {
    /// Read `status`, `code` and `message` from a backend error object.
    ///
    /// A numeric string status (`"401"`) is accepted as well.
    pub fn from_json(error: &JsonValue) -> Self {
        let status = match error.get("status") {
            Some(JsonValue::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Some(JsonValue::String(s)) => s.parse().ok(),
            _ => None,
        };
        let code = match error.get("code") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self {
            status,
            code,
            message: dataport_common::response::error_message(error),
        }
    }

    pub fn from_transport(error: &TransportError) -> Self {
        let mut signal = error.body().map(Self::from_json).unwrap_or_default();
        if let Some(status) = error.status() {
            signal.status = Some(status);
        }
        signal
    }
}

/// True when the error means the session expired or is invalid
pub fn is_auth_error(signal: &AuthErrorSignal) -> bool {
    signal.status == Some(401)
        || signal.code.as_deref() == Some(JWT_ERROR_CODE)
        || signal
            .message
            .as_deref()
            .is_some_and(|m| m.contains(JWT_EXPIRED_MESSAGE))
}

/// Holder of the authenticated user, owned by the application
pub trait SessionStore: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    fn set_user(&self, user: AuthUser);

    /// Forget the local session
    fn reset(&self);
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    user: RwLock<Option<AuthUser>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(user: AuthUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.read().clone()
    }

    fn set_user(&self, user: AuthUser) {
        *self.user.write() = Some(user);
    }

    fn reset(&self) {
        *self.user.write() = None;
    }
}

/// Reset the session when `signal` is an auth error. Returns whether it was.
pub fn reset_on_auth_error(store: &dyn SessionStore, signal: &AuthErrorSignal) -> bool {
    if !is_auth_error(signal) {
        return false;
    }
    warn!(
        status = ?signal.status,
        code = ?signal.code,
        "session expired or invalid, resetting local session"
    );
    store.reset();
    true
}
