use super::{ClientError, HandshakeCache};
use crate::application_port::*;
use crate::domain_model::*;
use crate::logger::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

pub type ClientResult<T> = Result<T, ClientError>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevokedBody {
    number_of_sessions_revoked: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandlesBody {
    session_handles: Vec<SessionHandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDataBody {
    user_data_in_database: Value,
}

#[derive(Debug, Deserialize)]
struct JwtDataBody {
    #[serde(rename = "userDataInJWT")]
    user_data_in_jwt: Value,
}

#[derive(Debug, Deserialize)]
struct EmptyBody {}

/// Talks to a countersign server over `/api/v1`.
pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
    handshake: HandshakeCache,
}

impl SessionClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3567`.
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            handshake: HandshakeCache::new(),
        })
    }

    /// Like [`SessionClient::new`], then tries to fill the handshake cache.
    /// A failed pre-fetch is logged and left for the first caller to retry.
    pub async fn connect(base_url: impl Into<String>) -> ClientResult<Self> {
        let client = Self::new(base_url)?;
        if let Err(e) = client.fetch_handshake().await {
            warn!("handshake pre-fetch failed: {}", e);
        }
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn handshake_cache(&self) -> &HandshakeCache {
        &self.handshake
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> ClientResult<T> {
        let body: Value = request.send().await?.json().await?;
        match body.get("status").and_then(Value::as_str) {
            Some("OK") => serde_json::from_value(body)
                .map_err(|e| ClientError::InvalidResponse(e.to_string())),
            Some(_) => Err(ClientError::from_status(body)),
            None => Err(ClientError::InvalidResponse(
                "missing status field".to_string(),
            )),
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<T> {
        Self::send(self.http.post(self.url(path)).json(body)).await
    }

    async fn put<B: Serialize>(&self, path: &str, body: &B) -> ClientResult<()> {
        Self::send::<EmptyBody>(self.http.put(self.url(path)).json(body))
            .await
            .map(|_| ())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ClientResult<T> {
        Self::send(self.http.get(self.url(path)).query(query)).await
    }

    async fn fetch_handshake(&self) -> ClientResult<HandshakeInfo> {
        let info: HandshakeInfo = self.post("/handshake", &json!({})).await?;
        self.handshake.store(info.clone()).await;
        Ok(info)
    }

    /// Cached handshake, fetched on first use or after invalidation.
    pub async fn handshake_info(&self) -> ClientResult<HandshakeInfo> {
        match self.handshake.get().await {
            Some(info) => Ok(info),
            None => self.fetch_handshake().await,
        }
    }

    pub async fn create_new_session(
        &self,
        user_id: &UserId,
        jwt_payload: Value,
        session_data: Value,
    ) -> ClientResult<NewSession> {
        let body = json!({
            "userId": user_id,
            "jwtPayload": jwt_payload,
            "sessionData": session_data,
        });
        let created: NewSession = self.post("/session", &body).await?;
        self.handshake
            .observe_public_key(&created.current_public_key)
            .await;
        Ok(created)
    }

    /// Verifies an access token. An unauthorised answer drops the cached
    /// handshake so the next read sees the server's current keys.
    pub async fn get_session(
        &self,
        access_token: &str,
        anti_csrf_token: Option<&str>,
        do_anti_csrf_check: bool,
    ) -> ClientResult<VerifiedSession> {
        let body = json!({
            "accessToken": access_token,
            "antiCsrfToken": anti_csrf_token,
            "doAntiCsrfCheck": do_anti_csrf_check,
        });
        match self.post::<_, VerifiedSession>("/session/verify", &body).await {
            Ok(verified) => {
                self.handshake
                    .observe_public_key(&verified.current_public_key)
                    .await;
                Ok(verified)
            }
            Err(ClientError::Unauthorised(message)) => {
                self.handshake.invalidate().await;
                Err(ClientError::Unauthorised(message))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> ClientResult<RefreshedSession> {
        self.post("/session/refresh", &json!({ "refreshToken": refresh_token }))
            .await
    }

    pub async fn revoke_all_sessions_for_user(&self, user_id: &UserId) -> ClientResult<u64> {
        let body = json!({ "userId": user_id });
        let revoked: RevokedBody =
            Self::send(self.http.delete(self.url("/session")).json(&body)).await?;
        Ok(revoked.number_of_sessions_revoked)
    }

    pub async fn revoke_session(&self, session_handle: &SessionHandle) -> ClientResult<bool> {
        let body = json!({ "sessionHandle": session_handle });
        let revoked: RevokedBody =
            Self::send(self.http.delete(self.url("/session")).json(&body)).await?;
        Ok(revoked.number_of_sessions_revoked == 1)
    }

    pub async fn get_all_session_handles_for_user(
        &self,
        user_id: &UserId,
    ) -> ClientResult<Vec<SessionHandle>> {
        let handles: HandlesBody = self
            .get("/session/user", &[("userId", user_id.0.as_str())])
            .await?;
        Ok(handles.session_handles)
    }

    pub async fn get_session_data(&self, session_handle: &SessionHandle) -> ClientResult<Value> {
        let data: SessionDataBody = self
            .get("/session/data", &[("sessionHandle", session_handle.0.as_str())])
            .await?;
        Ok(data.user_data_in_database)
    }

    pub async fn update_session_data(
        &self,
        session_handle: &SessionHandle,
        data: Value,
    ) -> ClientResult<()> {
        let body = json!({
            "sessionHandle": session_handle,
            "userDataInDatabase": data,
        });
        self.put("/session/data", &body).await
    }

    pub async fn get_jwt_payload(&self, session_handle: &SessionHandle) -> ClientResult<Value> {
        let data: JwtDataBody = self
            .get("/session/jwt/data", &[("sessionHandle", session_handle.0.as_str())])
            .await?;
        Ok(data.user_data_in_jwt)
    }

    pub async fn update_jwt_payload(
        &self,
        session_handle: &SessionHandle,
        payload: Value,
    ) -> ClientResult<()> {
        let body = json!({
            "sessionHandle": session_handle,
            "userDataInJWT": payload,
        });
        self.put("/session/jwt/data", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let client = SessionClient::new("http://127.0.0.1:3567/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:3567");
        assert_eq!(client.url("/session"), "http://127.0.0.1:3567/api/v1/session");
    }

    #[tokio::test]
    async fn connect_tolerates_unreachable_server() {
        // Port 9 (discard) is not expected to host an HTTP server.
        let client = SessionClient::connect("http://127.0.0.1:9").await.unwrap();
        assert!(client.handshake_cache().get().await.is_none());
    }
}
