use crate::application_port::SessionError;
use crate::domain_model::*;
use serde::{Deserialize, Serialize};

/// Claims of the self-contained access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: UserId,
    pub sid: SessionHandle,
    /// Refresh generation the token was minted under.
    pub rtg: Generation,
    pub pld: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acsrf: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Clone)]
pub struct DecodedAccessToken {
    pub claims: AccessTokenClaims,
    pub signed_with_current_key: bool,
}

/// Claims of the opaque refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sid: SessionHandle,
    pub rtg: Generation,
    pub exp: i64,
    pub nonce: String,
}

pub trait TokenCodec: Send + Sync {
    /// Signs with the current key.
    fn encode_access(&self, claims: &AccessTokenClaims) -> Result<String, SessionError>;
    /// Fails with `Unauthorized` on bad signature, unknown key or expiry.
    fn decode_access(&self, token: &str) -> Result<DecodedAccessToken, SessionError>;
    fn encode_refresh(&self, claims: &RefreshTokenClaims) -> Result<String, SessionError>;
    /// Fails with `Unauthorized` on bad MAC, malformed body or expiry.
    fn decode_refresh(&self, token: &str) -> Result<RefreshTokenClaims, SessionError>;
}
