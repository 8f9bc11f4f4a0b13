use crate::domain_model::*;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("infra error: {0}")]
    Store(String),
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Result of the compare-and-increment on a session's refresh generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationAdvance {
    /// The generation matched and was bumped; carries the updated row.
    Advanced(Session),
    /// Someone else advanced first.
    Stale { current: Generation },
    NotFound,
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), SessionStoreError>;

    /// Expired sessions read as absent.
    async fn get(&self, handle: &SessionHandle) -> Result<Option<Session>, SessionStoreError>;

    /// Atomically bump the refresh generation iff it still equals `expected`,
    /// moving the session's expiry to `expires_at`. Of any number of
    /// concurrent callers passing the same `expected`, at most one observes
    /// `Advanced`.
    async fn advance_generation(
        &self,
        handle: &SessionHandle,
        expected: Generation,
        expires_at: DateTime<Utc>,
    ) -> Result<GenerationAdvance, SessionStoreError>;

    /// Returns whether a row existed.
    async fn delete(&self, handle: &SessionHandle) -> Result<bool, SessionStoreError>;

    /// Returns the number of rows removed.
    async fn delete_for_user(&self, user_id: &UserId) -> Result<u64, SessionStoreError>;

    /// Live sessions only.
    async fn list_handles(&self, user_id: &UserId)
    -> Result<Vec<SessionHandle>, SessionStoreError>;

    /// Removes sessions that expired at or before `now`. Returns how many
    /// were removed.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, SessionStoreError>;

    /// Last writer wins. Returns false when the session does not exist.
    async fn update_session_data(
        &self,
        handle: &SessionHandle,
        data: &serde_json::Value,
    ) -> Result<bool, SessionStoreError>;

    /// Last writer wins. Returns false when the session does not exist.
    async fn update_jwt_payload(
        &self,
        handle: &SessionHandle,
        payload: &serde_json::Value,
    ) -> Result<bool, SessionStoreError>;
}
