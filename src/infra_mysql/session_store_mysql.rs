use super::util::{from_json_text, store_err, to_json_text};
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlConnection, MySqlPool, Row};

/// `session_info` table adapter; see `sql/session_info.sql`.
pub struct MySqlSessionStore {
    pool: MySqlPool,
}

/// Folds the compare-and-increment UPDATE and the re-read that follows it into
/// one outcome.
pub(crate) fn advance_outcome(rows_affected: u64, row: Option<Session>) -> GenerationAdvance {
    match (rows_affected, row) {
        (_, None) => GenerationAdvance::NotFound,
        (1, Some(session)) => GenerationAdvance::Advanced(session),
        (_, Some(session)) => GenerationAdvance::Stale {
            current: session.refresh_generation,
        },
    }
}

impl MySqlSessionStore {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlSessionStore { pool }
    }

    fn row_to_session(row: MySqlRow) -> Result<Session, SessionStoreError> {
        let handle: String = row.try_get("handle").map_err(store_err)?;
        let user_id: String = row.try_get("user_id").map_err(store_err)?;
        let jwt_payload: String = row.try_get("jwt_payload").map_err(store_err)?;
        let session_data: String = row.try_get("session_data").map_err(store_err)?;
        let refresh_generation: u64 = row.try_get("refresh_generation").map_err(store_err)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(store_err)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(store_err)?;

        Ok(Session {
            handle: SessionHandle(handle),
            user_id: UserId(user_id),
            jwt_payload: from_json_text(&jwt_payload)?,
            session_data: from_json_text(&session_data)?,
            refresh_generation: Generation(refresh_generation),
            created_at,
            expires_at,
        })
    }

    async fn fetch_live(
        conn: &mut MySqlConnection,
        handle: &SessionHandle,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, SessionStoreError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT handle, user_id, jwt_payload, session_data, refresh_generation, created_at, expires_at
FROM session_info
WHERE handle = ? AND expires_at > ?
"#,
        )
        .bind(&handle.0)
        .bind(now)
        .fetch_optional(conn)
        .await
        .map_err(store_err)?;

        row_opt.map(Self::row_to_session).transpose()
    }

    async fn exists(&self, handle: &SessionHandle) -> Result<bool, SessionStoreError> {
        let row: Option<MySqlRow> =
            sqlx::query("SELECT 1 FROM session_info WHERE handle = ? AND expires_at > ?")
                .bind(&handle.0)
                .bind(Utc::now())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(row.is_some())
    }

    async fn update_text_column(
        &self,
        sql: &str,
        handle: &SessionHandle,
        value: &serde_json::Value,
    ) -> Result<bool, SessionStoreError> {
        let result = sqlx::query(sql)
            .bind(to_json_text(value)?)
            .bind(&handle.0)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // sqlx sets CLIENT_FOUND_ROWS, so zero already means no live row. The
        // re-check keeps the answer right behind proxies that count changed rows.
        self.exists(handle).await
    }
}

#[async_trait::async_trait]
impl SessionStore for MySqlSessionStore {
    async fn insert(&self, session: &Session) -> Result<(), SessionStoreError> {
        sqlx::query(
            r#"
INSERT INTO session_info
    (handle, user_id, jwt_payload, session_data, refresh_generation, created_at, expires_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(&session.handle.0)
        .bind(&session.user_id.0)
        .bind(to_json_text(&session.jwt_payload)?)
        .bind(to_json_text(&session.session_data)?)
        .bind(session.refresh_generation.0)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get(&self, handle: &SessionHandle) -> Result<Option<Session>, SessionStoreError> {
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        Self::fetch_live(&mut conn, handle, Utc::now()).await
    }

    async fn advance_generation(
        &self,
        handle: &SessionHandle,
        expected: Generation,
        expires_at: DateTime<Utc>,
    ) -> Result<GenerationAdvance, SessionStoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let result = sqlx::query(
            r#"
UPDATE session_info
SET refresh_generation = refresh_generation + 1, expires_at = ?
WHERE handle = ? AND refresh_generation = ? AND expires_at > ?
"#,
        )
        .bind(expires_at)
        .bind(&handle.0)
        .bind(expected.0)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        // The row lock taken by the UPDATE is held until commit, so the read
        // below sees exactly the generation this call produced.
        let row = Self::fetch_live(&mut tx, handle, now).await?;
        tx.commit().await.map_err(store_err)?;

        Ok(advance_outcome(result.rows_affected(), row))
    }

    async fn delete(&self, handle: &SessionHandle) -> Result<bool, SessionStoreError> {
        let result = sqlx::query("DELETE FROM session_info WHERE handle = ?")
            .bind(&handle.0)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<u64, SessionStoreError> {
        let result = sqlx::query("DELETE FROM session_info WHERE user_id = ?")
            .bind(&user_id.0)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn list_handles(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, SessionStoreError> {
        let rows: Vec<MySqlRow> = sqlx::query(
            r#"
SELECT handle
FROM session_info
WHERE user_id = ? AND expires_at > ?
ORDER BY created_at
"#,
        )
        .bind(&user_id.0)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("handle")
                    .map(SessionHandle)
                    .map_err(store_err)
            })
            .collect()
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, SessionStoreError> {
        let result = sqlx::query("DELETE FROM session_info WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn update_session_data(
        &self,
        handle: &SessionHandle,
        data: &serde_json::Value,
    ) -> Result<bool, SessionStoreError> {
        self.update_text_column(
            "UPDATE session_info SET session_data = ? WHERE handle = ? AND expires_at > ?",
            handle,
            data,
        )
        .await
    }

    async fn update_jwt_payload(
        &self,
        handle: &SessionHandle,
        payload: &serde_json::Value,
    ) -> Result<bool, SessionStoreError> {
        self.update_text_column(
            "UPDATE session_info SET jwt_payload = ? WHERE handle = ? AND expires_at > ?",
            handle,
            payload,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_at(generation: u64) -> Session {
        let mut session = Session::new(
            UserId::from("u1"),
            json!({}),
            json!({}),
            Utc::now() + chrono::Duration::hours(1),
        );
        session.refresh_generation = Generation(generation);
        session
    }

    #[test]
    fn one_affected_row_is_the_winner() {
        let row = session_at(4);
        assert_eq!(
            advance_outcome(1, Some(row.clone())),
            GenerationAdvance::Advanced(row)
        );
    }

    #[test]
    fn untouched_row_reports_current_generation() {
        assert_eq!(
            advance_outcome(0, Some(session_at(7))),
            GenerationAdvance::Stale {
                current: Generation(7)
            }
        );
    }

    #[test]
    fn missing_or_expired_row_is_not_found() {
        assert_eq!(advance_outcome(0, None), GenerationAdvance::NotFound);
        assert_eq!(advance_outcome(1, None), GenerationAdvance::NotFound);
    }
}
