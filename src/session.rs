//! Per-user bearer sessions issued at login.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::codec::User;
use crate::users::Status;

/// How long a login stays valid, in seconds.
pub const SESSION_DURATION: u64 = 24 * 60 * 60;

/// An authenticated user session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Id of the user that logged in
    pub user_id: String,

    /// Role the user had at login time
    pub role: String,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

/// Thread-safe map of session tokens to sessions.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    lifetime: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_lifetime(Duration::from_secs(SESSION_DURATION))
    }

    pub fn with_lifetime(lifetime: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Create a session for `user` and return its token.
    pub fn create(&self, user: &User) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id: user.id.clone(),
            role: user.role.clone(),
            expires_at: SystemTime::now() + self.lifetime,
        };

        // A poisoned lock still holds a usable map
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(token.clone(), session);

        token
    }

    /// Look up a token, ignoring expired sessions.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());

        sessions
            .get(token)
            .filter(|s| s.expires_at > SystemTime::now())
            .cloned()
    }

    /// Forget a token. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(token).is_some()
    }

    /// Forget every session belonging to `user_id`, e.g. after the account is deleted.
    pub fn revoke_user(&self, user_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, s| s.user_id != user_id);
    }

    /// Bring `user`'s open sessions in line with their account after an edit:
    /// a changed role applies at once, and a non-active account is logged out.
    pub fn sync_user(&self, user: &User) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());

        if Status::parse(&user.status) != Some(Status::Active) {
            sessions.retain(|_, s| s.user_id != user.id);
            return;
        }
        for session in sessions.values_mut().filter(|s| s.user_id == user.id) {
            session.role = user.role.clone();
        }
    }

    /// Drop expired sessions and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        before - sessions.len()
    }
}
