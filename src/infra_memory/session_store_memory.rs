use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Process-local store. The generation compare-and-increment runs under the
/// entry's shard write guard, which makes it atomic per session. Expired
/// entries stay invisible to reads until [`SessionStore::prune_expired`]
/// drops them.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionHandle, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn handles_of(&self, user_id: &UserId) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .filter(|entry| &entry.value().user_id == user_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn live_handles_of(&self, user_id: &UserId, now: DateTime<Utc>) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .filter(|entry| &entry.value().user_id == user_id && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.sessions.insert(session.handle.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, handle: &SessionHandle) -> Result<Option<Session>, SessionStoreError> {
        let now = Utc::now();
        Ok(self
            .sessions
            .get(handle)
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| entry.value().clone()))
    }

    async fn advance_generation(
        &self,
        handle: &SessionHandle,
        expected: Generation,
        expires_at: DateTime<Utc>,
    ) -> Result<GenerationAdvance, SessionStoreError> {
        let Some(mut entry) = self.sessions.get_mut(handle) else {
            return Ok(GenerationAdvance::NotFound);
        };
        if entry.is_expired(Utc::now()) {
            return Ok(GenerationAdvance::NotFound);
        }
        if entry.refresh_generation != expected {
            return Ok(GenerationAdvance::Stale {
                current: entry.refresh_generation,
            });
        }
        entry.refresh_generation = expected.next();
        entry.expires_at = expires_at;
        Ok(GenerationAdvance::Advanced(entry.value().clone()))
    }

    async fn delete(&self, handle: &SessionHandle) -> Result<bool, SessionStoreError> {
        Ok(self.sessions.remove(handle).is_some())
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<u64, SessionStoreError> {
        // Collect first: removing while iterating would deadlock on the shard.
        let removed = self
            .handles_of(user_id)
            .into_iter()
            .filter(|handle| self.sessions.remove(handle).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn list_handles(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, SessionStoreError> {
        Ok(self.live_handles_of(user_id, Utc::now()))
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, SessionStoreError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }

    async fn update_session_data(
        &self,
        handle: &SessionHandle,
        data: &serde_json::Value,
    ) -> Result<bool, SessionStoreError> {
        Ok(match self.sessions.get_mut(handle) {
            Some(mut entry) if !entry.is_expired(Utc::now()) => {
                entry.session_data = data.clone();
                true
            }
            _ => false,
        })
    }

    async fn update_jwt_payload(
        &self,
        handle: &SessionHandle,
        payload: &serde_json::Value,
    ) -> Result<bool, SessionStoreError> {
        Ok(match self.sessions.get_mut(handle) {
            Some(mut entry) if !entry.is_expired(Utc::now()) => {
                entry.jwt_payload = payload.clone();
                true
            }
            _ => false,
        })
    }
}
