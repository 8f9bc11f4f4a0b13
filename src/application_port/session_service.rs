use crate::domain_model::*;
use crate::domain_port::SessionStoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unauthorised: {0}")]
    Unauthorized(String),
    #[error("token theft detected on session {session_handle} of user {user_id}")]
    TokenTheftDetected {
        session_handle: SessionHandle,
        user_id: UserId,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        SessionError::Unauthorized(message.into())
    }
}

impl From<SessionStoreError> for SessionError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::Store(e) => SessionError::Storage(e),
            SessionStoreError::InternalError(e) => SessionError::Storage(format!("{e:#}")),
        }
    }
}

/// What the manager does after reporting a replayed refresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TheftResponse {
    /// Report only; the caller decides whether to revoke.
    Report,
    /// Report and revoke the session.
    Revoke,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub anti_csrf: bool,
    pub theft_response: TheftResponse,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.issuer.trim().is_empty() {
            return Err(SessionError::Config("issuer must not be empty".to_string()));
        }
        if self.access_ttl.is_zero() {
            return Err(SessionError::Config(
                "access token ttl must be positive".to_string(),
            ));
        }
        if self.refresh_ttl < self.access_ttl {
            return Err(SessionError::Config(
                "refresh token ttl must not be shorter than access token ttl".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

/// Identity fields of a session as seen by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub handle: SessionHandle,
    pub user_id: UserId,
    #[serde(rename = "userDataInJWT")]
    pub user_data_in_jwt: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub user_id: UserId,
    pub jwt_payload: serde_json::Value,
    pub session_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub session: SessionInfo,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
    pub id_refresh_token: IssuedToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<String>,
    pub current_public_key: PublicKeyInfo,
}

#[derive(Debug, Clone)]
pub struct VerifyInput {
    pub access_token: String,
    pub anti_csrf_token: Option<String>,
    pub do_anti_csrf_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedSession {
    pub session: SessionInfo,
    /// Present when the presented token was signed by a retired key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<IssuedToken>,
    pub current_public_key: PublicKeyInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedSession {
    pub session: SessionInfo,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
    pub id_refresh_token: IssuedToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<String>,
}

#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    async fn create_session(&self, input: CreateSessionInput) -> Result<NewSession, SessionError>;

    /// Never touches the session store.
    async fn verify_session(&self, input: VerifyInput) -> Result<VerifiedSession, SessionError>;

    async fn refresh_session(&self, refresh_token: &str)
    -> Result<RefreshedSession, SessionError>;

    async fn revoke_all_sessions_for_user(&self, user_id: &UserId) -> Result<u64, SessionError>;

    async fn revoke_session(&self, handle: &SessionHandle) -> Result<bool, SessionError>;

    async fn list_session_handles(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, SessionError>;

    async fn get_session_data(
        &self,
        handle: &SessionHandle,
    ) -> Result<serde_json::Value, SessionError>;

    async fn update_session_data(
        &self,
        handle: &SessionHandle,
        data: serde_json::Value,
    ) -> Result<(), SessionError>;

    async fn get_jwt_payload(
        &self,
        handle: &SessionHandle,
    ) -> Result<serde_json::Value, SessionError>;

    async fn update_jwt_payload(
        &self,
        handle: &SessionHandle,
        payload: serde_json::Value,
    ) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            issuer: "countersign".to_string(),
            access_ttl: Duration::from_secs(3600),
            refresh_ttl: Duration::from_secs(86400),
            anti_csrf: false,
            theft_response: TheftResponse::Report,
        }
    }

    #[test]
    fn validate_accepts_sane_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_access_ttl() {
        let mut cfg = config();
        cfg.access_ttl = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn validate_rejects_refresh_shorter_than_access() {
        let mut cfg = config();
        cfg.refresh_ttl = Duration::from_secs(60);
        assert!(matches!(cfg.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn store_errors_surface_as_storage() {
        let err: SessionError = SessionStoreError::Store("connection reset".into()).into();
        assert!(matches!(err, SessionError::Storage(msg) if msg == "connection reset"));
    }
}
