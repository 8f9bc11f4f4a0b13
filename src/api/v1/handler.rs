use super::error::*;
use crate::application_port::*;
use crate::domain_model::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::{self, reject};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiStatus {
    Ok,
}

/// `{"status": "OK", ...body}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: ApiStatus,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            status: ApiStatus::Ok,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
struct Empty {}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: UserId,
    #[serde(default = "empty_object")]
    pub jwt_payload: serde_json::Value,
    #[serde(default = "empty_object")]
    pub session_data: serde_json::Value,
}

pub async fn create_session(
    body: CreateSessionRequest,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let input = CreateSessionInput {
        user_id: body.user_id,
        jwt_payload: body.jwt_payload,
        session_data: body.session_data,
    };
    let new_session = session_service
        .create_session(input)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(new_session)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionRequest {
    pub access_token: String,
    pub anti_csrf_token: Option<String>,
    #[serde(default)]
    pub do_anti_csrf_check: bool,
}

pub async fn verify_session(
    body: VerifySessionRequest,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let input = VerifyInput {
        access_token: body.access_token,
        anti_csrf_token: body.anti_csrf_token,
        do_anti_csrf_check: body.do_anti_csrf_check,
    };
    let verified = session_service
        .verify_session(input)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(verified)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionRequest {
    pub refresh_token: String,
}

pub async fn refresh_session(
    body: RefreshSessionRequest,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let refreshed = session_service
        .refresh_session(&body.refresh_token)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(refreshed)))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RevokeSessionRequest {
    #[serde(rename_all = "camelCase")]
    ByUser { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    ByHandle { session_handle: SessionHandle },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSessionResponse {
    pub number_of_sessions_revoked: u64,
}

pub async fn revoke_session(
    body: RevokeSessionRequest,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let revoked = match body {
        RevokeSessionRequest::ByUser { user_id } => {
            session_service.revoke_all_sessions_for_user(&user_id).await
        }
        RevokeSessionRequest::ByHandle { session_handle } => session_service
            .revoke_session(&session_handle)
            .await
            .map(u64::from),
    }
    .map_err(ApiErrorCode::from)
    .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(RevokeSessionResponse {
        number_of_sessions_revoked: revoked,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandlesQuery {
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandlesResponse {
    pub session_handles: Vec<SessionHandle>,
}

pub async fn list_session_handles(
    query: SessionHandlesQuery,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let session_handles = session_service
        .list_session_handles(&query.user_id)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(SessionHandlesResponse {
        session_handles,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandleQuery {
    pub session_handle: SessionHandle,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDataBody {
    pub user_data_in_database: serde_json::Value,
}

pub async fn get_session_data(
    query: SessionHandleQuery,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let data = session_service
        .get_session_data(&query.session_handle)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(SessionDataBody {
        user_data_in_database: data,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionDataRequest {
    pub session_handle: SessionHandle,
    pub user_data_in_database: serde_json::Value,
}

pub async fn update_session_data(
    body: UpdateSessionDataRequest,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    session_service
        .update_session_data(&body.session_handle, body.user_data_in_database)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(Empty {})))
}

#[derive(Debug, Serialize)]
pub struct JwtDataBody {
    #[serde(rename = "userDataInJWT")]
    pub user_data_in_jwt: serde_json::Value,
}

pub async fn get_jwt_payload(
    query: SessionHandleQuery,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let payload = session_service
        .get_jwt_payload(&query.session_handle)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(JwtDataBody {
        user_data_in_jwt: payload,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateJwtPayloadRequest {
    #[serde(rename = "sessionHandle")]
    pub session_handle: SessionHandle,
    #[serde(rename = "userDataInJWT")]
    pub user_data_in_jwt: serde_json::Value,
}

pub async fn update_jwt_payload(
    body: UpdateJwtPayloadRequest,
    session_service: Arc<dyn SessionService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    session_service
        .update_jwt_payload(&body.session_handle, body.user_data_in_jwt)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(Empty {})))
}

pub async fn handshake(
    handshake_service: Arc<dyn HandshakeService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let info = handshake_service.handshake().await;
    Ok(warp::reply::json(&ApiResponse::ok(info)))
}
