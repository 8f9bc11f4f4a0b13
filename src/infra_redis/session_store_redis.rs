use crate::domain_model::*;
use crate::domain_port::*;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Pipeline, RedisWrite, Script, ToRedisArgs};
use std::collections::HashMap;

const ADVANCE_GENERATION: &str = include_str!("advance_generation.lua");
const UPDATE_IF_EXISTS: &str = include_str!("update_if_exists.lua");

const FIELD_USER_ID: &str = "user_id";
const FIELD_JWT_PAYLOAD: &str = "jwt_payload";
const FIELD_SESSION_DATA: &str = "session_data";
const FIELD_GENERATION: &str = "refresh_generation";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_EXPIRES_AT: &str = "expires_at";

const SCAN_BATCH: usize = 100;

/// Outcome reported by `advance_generation.lua`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScriptAdvance {
    Advanced(Generation),
    Stale(Generation),
    Missing,
}

pub(crate) fn script_advance(status: i64, generation: u64) -> Result<ScriptAdvance, SessionStoreError> {
    match status {
        1 => Ok(ScriptAdvance::Advanced(Generation(generation))),
        0 => Ok(ScriptAdvance::Stale(Generation(generation))),
        -1 => Ok(ScriptAdvance::Missing),
        other => Err(SessionStoreError::InternalError(anyhow!(
            "unknown script status {other}"
        ))),
    }
}

/// Deletes the given session hashes and unlinks exactly those handles from the
/// user index. Handles added to the index after it was read stay in place.
pub(crate) fn revoke_handles_pipeline(
    user_key: &str,
    session_keys: &[String],
    handles: &[String],
) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .del(session_keys)
        .srem(user_key, handles)
        .ignore();
    pipe
}

/// Sessions live in one hash per handle, expiring with the newest refresh
/// token; a set per user indexes the handles. Index entries whose hash has
/// expired are swept by `list_handles` and `prune_expired`.
pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
    advance_script: Script,
    update_script: Script,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisSessionStore {
            conn,
            prefix: prefix.into(),
            advance_script: Script::new(ADVANCE_GENERATION),
            update_script: Script::new(UPDATE_IF_EXISTS),
        }
    }

    fn session_key(&self, handle: &SessionHandle) -> String {
        format!("{}:session:{}", self.prefix, handle)
    }

    fn user_key(&self, user_id: &UserId) -> String {
        format!("{}:user:{}", self.prefix, user_id)
    }

    pub(crate) fn hash_to_session(
        handle: &SessionHandle,
        mut fields: HashMap<String, String>,
    ) -> Result<Session, SessionStoreError> {
        let mut take = |name: &str| {
            fields.remove(name).ok_or_else(|| {
                SessionStoreError::InternalError(anyhow!("session {handle} lacks field {name}"))
            })
        };
        let user_id = take(FIELD_USER_ID)?;
        let jwt_payload = take(FIELD_JWT_PAYLOAD)?;
        let session_data = take(FIELD_SESSION_DATA)?;
        let generation = take(FIELD_GENERATION)?;
        let created_at = take(FIELD_CREATED_AT)?;
        let expires_at = take(FIELD_EXPIRES_AT)?;

        Ok(Session {
            handle: handle.clone(),
            user_id: UserId(user_id),
            jwt_payload: parse_json(&jwt_payload)?,
            session_data: parse_json(&session_data)?,
            refresh_generation: Generation(
                generation
                    .parse()
                    .map_err(|e| SessionStoreError::InternalError(anyhow!("bad generation: {e}")))?,
            ),
            created_at: parse_time(&created_at)?,
            expires_at: parse_time(&expires_at)?,
        })
    }

    async fn update_field(
        &self,
        handle: &SessionHandle,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<bool, SessionStoreError> {
        let mut conn = self.conn.clone();
        let updated: i64 = self
            .update_script
            .key(self.session_key(handle))
            .arg(field)
            .arg(to_json(value)?)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        Ok(updated == 1)
    }

    /// Drops index entries whose session hash is gone. Returns the live
    /// handles and how many entries were removed.
    async fn sweep_user_index(
        &self,
        conn: &mut ConnectionManager,
        user_key: &str,
    ) -> Result<(Vec<SessionHandle>, u64), SessionStoreError> {
        let handles: Vec<String> = conn
            .smembers(user_key)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        if handles.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let mut pipe = redis::pipe();
        for handle in &handles {
            pipe.exists(self.session_key(&SessionHandle(handle.clone())));
        }
        let alive: Vec<bool> = pipe
            .query_async(conn)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;

        let (live, dead): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .zip(alive)
            .partition(|(_, alive)| *alive);
        let dead: Vec<String> = dead.into_iter().map(|(h, _)| h).collect();
        if !dead.is_empty() {
            let _: () = conn
                .srem(user_key, &dead)
                .await
                .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        }

        Ok((
            live.into_iter().map(|(h, _)| SessionHandle(h)).collect(),
            dead.len() as u64,
        ))
    }
}

impl ToRedisArgs for SessionHandle {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(self.0.as_bytes())
    }
}

fn to_json(value: &serde_json::Value) -> Result<String, SessionStoreError> {
    serde_json::to_string(value).map_err(|e| SessionStoreError::InternalError(e.into()))
}

fn parse_json(text: &str) -> Result<serde_json::Value, SessionStoreError> {
    serde_json::from_str(text).map_err(|e| SessionStoreError::InternalError(e.into()))
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, SessionStoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SessionStoreError::InternalError(anyhow!("bad timestamp {text}: {e}")))
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert(&self, session: &Session) -> Result<(), SessionStoreError> {
        let key = self.session_key(&session.handle);
        let fields = [
            (FIELD_USER_ID, session.user_id.0.clone()),
            (FIELD_JWT_PAYLOAD, to_json(&session.jwt_payload)?),
            (FIELD_SESSION_DATA, to_json(&session.session_data)?),
            (FIELD_GENERATION, session.refresh_generation.0.to_string()),
            (FIELD_CREATED_AT, session.created_at.to_rfc3339()),
            (FIELD_EXPIRES_AT, session.expires_at.to_rfc3339()),
        ];
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .expire_at(&key, session.expires_at.timestamp())
            .ignore()
            .sadd(self.user_key(&session.user_id), &session.handle)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, handle: &SessionHandle) -> Result<Option<Session>, SessionStoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.session_key(handle))
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        if fields.is_empty() {
            return Ok(None);
        }
        Self::hash_to_session(handle, fields).map(Some)
    }

    async fn advance_generation(
        &self,
        handle: &SessionHandle,
        expected: Generation,
        expires_at: DateTime<Utc>,
    ) -> Result<GenerationAdvance, SessionStoreError> {
        let mut conn = self.conn.clone();
        let (status, generation): (i64, u64) = self
            .advance_script
            .key(self.session_key(handle))
            .arg(expected.0)
            .arg(expires_at.timestamp())
            .arg(expires_at.to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;

        match script_advance(status, generation)? {
            ScriptAdvance::Advanced(generation) => {
                let Some(mut session) = self.get(handle).await? else {
                    return Ok(GenerationAdvance::NotFound);
                };
                // Pin what the script wrote; a later advance may already be
                // visible in the re-read.
                session.refresh_generation = generation;
                session.expires_at = expires_at;
                Ok(GenerationAdvance::Advanced(session))
            }
            ScriptAdvance::Stale(current) => Ok(GenerationAdvance::Stale { current }),
            ScriptAdvance::Missing => Ok(GenerationAdvance::NotFound),
        }
    }

    async fn delete(&self, handle: &SessionHandle) -> Result<bool, SessionStoreError> {
        let key = self.session_key(handle);
        let mut conn = self.conn.clone();
        let user_id: Option<String> = conn
            .hget(&key, FIELD_USER_ID)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        let (removed,): (u64,) = redis::pipe()
            .atomic()
            .del(&key)
            .srem(self.user_key(&UserId(user_id)), handle)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<u64, SessionStoreError> {
        let user_key = self.user_key(user_id);
        let mut conn = self.conn.clone();
        let handles: Vec<String> = conn
            .smembers(&user_key)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        if handles.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = handles
            .iter()
            .map(|h| self.session_key(&SessionHandle(h.clone())))
            .collect();
        let (removed,): (u64,) = revoke_handles_pipeline(&user_key, &keys, &handles)
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionStoreError::Store(e.to_string()))?;
        Ok(removed)
    }

    async fn list_handles(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, SessionStoreError> {
        let mut conn = self.conn.clone();
        let (live, _) = self
            .sweep_user_index(&mut conn, &self.user_key(user_id))
            .await?;
        Ok(live)
    }

    /// Session hashes expire on their own; this sweeps the user indexes.
    async fn prune_expired(&self, _now: DateTime<Utc>) -> Result<u64, SessionStoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:user:*", self.prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let (next, user_keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| SessionStoreError::Store(e.to_string()))?;
            for user_key in user_keys {
                let (_, dropped) = self.sweep_user_index(&mut conn, &user_key).await?;
                removed += dropped;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn update_session_data(
        &self,
        handle: &SessionHandle,
        data: &serde_json::Value,
    ) -> Result<bool, SessionStoreError> {
        self.update_field(handle, FIELD_SESSION_DATA, data).await
    }

    async fn update_jwt_payload(
        &self,
        handle: &SessionHandle,
        payload: &serde_json::Value,
    ) -> Result<bool, SessionStoreError> {
        self.update_field(handle, FIELD_JWT_PAYLOAD, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resp_command(args: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            out.extend_from_slice(format!("${}\r\n{}\r\n", arg.len(), arg).as_bytes());
        }
        out
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn fields() -> HashMap<String, String> {
        [
            (FIELD_USER_ID, "u1".to_string()),
            (FIELD_JWT_PAYLOAD, r#"{"role":"admin"}"#.to_string()),
            (FIELD_SESSION_DATA, "{}".to_string()),
            (FIELD_GENERATION, "3".to_string()),
            (FIELD_CREATED_AT, "2026-01-01T00:00:00+00:00".to_string()),
            (FIELD_EXPIRES_AT, "2026-01-02T00:00:00+00:00".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn hash_maps_onto_session() {
        let handle = SessionHandle::from("h1");
        let session = RedisSessionStore::hash_to_session(&handle, fields()).unwrap();
        assert_eq!(session.handle, handle);
        assert_eq!(session.user_id, UserId::from("u1"));
        assert_eq!(session.jwt_payload, json!({"role": "admin"}));
        assert_eq!(session.refresh_generation, Generation(3));
        assert_eq!(
            session.expires_at - session.created_at,
            chrono::Duration::days(1)
        );
    }

    #[test]
    fn hash_with_missing_or_bad_field_is_an_error() {
        let handle = SessionHandle::from("h1");
        let mut missing = fields();
        missing.remove(FIELD_EXPIRES_AT);
        assert!(RedisSessionStore::hash_to_session(&handle, missing).is_err());

        let mut bad = fields();
        bad.insert(FIELD_GENERATION.to_string(), "three".to_string());
        assert!(RedisSessionStore::hash_to_session(&handle, bad).is_err());
    }

    #[test]
    fn script_status_maps_to_outcome() {
        assert_eq!(script_advance(1, 5).unwrap(), ScriptAdvance::Advanced(Generation(5)));
        assert_eq!(script_advance(0, 5).unwrap(), ScriptAdvance::Stale(Generation(5)));
        assert_eq!(script_advance(-1, 0).unwrap(), ScriptAdvance::Missing);
        assert!(script_advance(2, 0).is_err());
    }

    #[test]
    fn bulk_revoke_unlinks_only_collected_handles() {
        let keys = vec!["p:session:h1".to_string()];
        let handles = vec!["h1".to_string()];
        let packed = revoke_handles_pipeline("p:user:u1", &keys, &handles).get_packed_pipeline();

        assert!(contains(&packed, &resp_command(&["SREM", "p:user:u1", "h1"])));
        assert!(contains(&packed, &resp_command(&["DEL", "p:session:h1"])));
        assert!(!contains(&packed, &resp_command(&["DEL", "p:user:u1"])));
    }
}
