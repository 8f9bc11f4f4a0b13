use crate::domain_model::{SessionHandle, UserId};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unauthorised: {0}")]
    Unauthorised(String),

    #[error("token theft detected for session {session_handle} of user {user_id}")]
    TokenTheftDetected {
        session_handle: SessionHandle,
        user_id: UserId,
    },

    /// `BAD_REQUEST` or `GENERAL_ERROR` from the server.
    #[error("server error: {0}")]
    General(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TheftBody {
    handle: SessionHandle,
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
enum ErrorBody {
    Unauthorised {
        #[serde(default)]
        message: String,
    },
    TokenTheftDetected {
        session: TheftBody,
    },
    BadRequest {
        #[serde(default)]
        message: String,
    },
    GeneralError {
        #[serde(default)]
        message: String,
    },
}

impl ClientError {
    /// Maps a non-`OK` response body onto the matching variant.
    pub fn from_status(body: serde_json::Value) -> ClientError {
        match serde_json::from_value::<ErrorBody>(body) {
            Ok(ErrorBody::Unauthorised { message }) => ClientError::Unauthorised(message),
            Ok(ErrorBody::TokenTheftDetected { session }) => ClientError::TokenTheftDetected {
                session_handle: session.handle,
                user_id: session.user_id,
            },
            Ok(ErrorBody::BadRequest { message }) | Ok(ErrorBody::GeneralError { message }) => {
                ClientError::General(message)
            }
            Err(e) => ClientError::InvalidResponse(e.to_string()),
        }
    }
}
