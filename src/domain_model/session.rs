use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_owned())
    }
}

/// Opaque, unguessable identifier of one session row.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    pub fn generate() -> Self {
        SessionHandle(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionHandle {
    fn from(s: &str) -> Self {
        SessionHandle(s.to_owned())
    }
}

/// Refresh-token generation counter of a session.
///
/// Only the token minted for the session's current generation may be
/// exchanged; an older generation presented with a valid MAC is a replay.
#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    pub const INITIAL: Generation = Generation(0);

    pub fn next(self) -> Generation {
        Generation(self.0.saturating_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub handle: SessionHandle,
    pub user_id: UserId,
    /// Embedded in every access token minted after it is set.
    pub jwt_payload: serde_json::Value,
    /// Server-side only, never leaves the store inside a token.
    pub session_data: serde_json::Value,
    pub refresh_generation: Generation,
    pub created_at: DateTime<Utc>,
    /// Expiry of the newest refresh token; the session is dead after it.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        user_id: UserId,
        jwt_payload: serde_json::Value,
        session_data: serde_json::Value,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Session {
            handle: SessionHandle::generate(),
            user_id,
            jwt_payload,
            session_data,
            refresh_generation: Generation::INITIAL,
            created_at: Utc::now(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_session_starts_at_initial_generation() {
        let expires_at = Utc::now() + chrono::Duration::hours(1);
        let session = Session::new(
            UserId::from("u1"),
            json!({"role": "admin"}),
            json!({}),
            expires_at,
        );
        assert_eq!(session.refresh_generation, Generation::INITIAL);
        assert_eq!(session.user_id.0, "u1");
        assert!(!session.is_expired(Utc::now()));
        assert!(session.is_expired(expires_at));
    }

    #[test]
    fn generated_handles_are_distinct() {
        assert_ne!(SessionHandle::generate(), SessionHandle::generate());
    }

    #[test]
    fn generation_next_is_strictly_greater() {
        let g = Generation(41);
        assert!(g.next() > g);
        assert_eq!(Generation(u64::MAX).next(), Generation(u64::MAX));
    }
}
