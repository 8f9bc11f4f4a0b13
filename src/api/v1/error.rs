use crate::application_port::*;
use crate::domain_model::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Rejection, reject};

/// Every non-OK outcome the API reports. Serialized as
/// `{"status": "...", ...}` next to the OK bodies.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    #[error("{message}")]
    Unauthorised { message: String },
    #[error("token theft detected")]
    TokenTheftDetected { session: TheftSession },
    #[error("{message}")]
    BadRequest { message: String },
    #[error("{message}")]
    GeneralError { message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TheftSession {
    pub handle: SessionHandle,
    pub user_id: UserId,
}

impl ApiErrorCode {
    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        warn!("Internal error: {}", error);
        ApiErrorCode::GeneralError {
            message: "internal error".to_string(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            // Protocol outcomes, not transport failures.
            ApiErrorCode::Unauthorised { .. } | ApiErrorCode::TokenTheftDetected { .. } => {
                StatusCode::OK
            }
            ApiErrorCode::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiErrorCode::GeneralError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl reject::Reject for ApiErrorCode {}

impl From<SessionError> for ApiErrorCode {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Unauthorized(message) => ApiErrorCode::Unauthorised { message },
            SessionError::TokenTheftDetected {
                session_handle,
                user_id,
            } => ApiErrorCode::TokenTheftDetected {
                session: TheftSession {
                    handle: session_handle,
                    user_id,
                },
            },
            SessionError::Storage(e) => ApiErrorCode::internal(format!("storage: {e}")),
            SessionError::Config(e) => ApiErrorCode::internal(format!("config: {e}")),
            SessionError::Internal(e) => ApiErrorCode::internal(e),
        }
    }
}

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let code = if let Some(code) = err.find::<ApiErrorCode>() {
        code.clone()
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        ApiErrorCode::BadRequest {
            message: e.to_string(),
        }
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        ApiErrorCode::BadRequest {
            message: e.to_string(),
        }
    } else if err.is_not_found() {
        let json = warp::reply::json(&ApiErrorCode::BadRequest {
            message: "no such endpoint".to_string(),
        });
        return Ok(warp::reply::with_status(json, StatusCode::NOT_FOUND));
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        let json = warp::reply::json(&ApiErrorCode::BadRequest {
            message: "method not allowed".to_string(),
        });
        return Ok(warp::reply::with_status(json, StatusCode::METHOD_NOT_ALLOWED));
    } else {
        ApiErrorCode::GeneralError {
            message: format!("Unhandled error: {:?}", err),
        }
    };

    let status = code.status_code();
    Ok(warp::reply::with_status(warp::reply::json(&code), status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn theft_serializes_with_session_identity() {
        let code = ApiErrorCode::from(SessionError::TokenTheftDetected {
            session_handle: SessionHandle::from("h1"),
            user_id: UserId::from("u1"),
        });
        assert_eq!(
            serde_json::to_value(&code).unwrap(),
            json!({"status": "TOKEN_THEFT_DETECTED", "session": {"handle": "h1", "userId": "u1"}})
        );
        assert_eq!(code.status_code(), StatusCode::OK);
    }

    #[test]
    fn storage_failures_hide_details() {
        let code = ApiErrorCode::from(SessionError::Storage("dsn=secret".into()));
        let body = serde_json::to_value(&code).unwrap();
        assert_eq!(body["status"], "GENERAL_ERROR");
        assert!(!body["message"].as_str().unwrap().contains("secret"));
        assert_eq!(code.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unauthorized_keeps_its_message() {
        let code = ApiErrorCode::from(SessionError::unauthorized("access token expired"));
        assert_eq!(
            serde_json::to_value(&code).unwrap(),
            json!({"status": "UNAUTHORISED", "message": "access token expired"})
        );
    }
}
