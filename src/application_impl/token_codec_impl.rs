use crate::application_impl::KeyStore;
use crate::application_port::*;
use crate::domain_model::KeyId;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

const MIN_REFRESH_SECRET_LEN: usize = 16;

/// Access tokens are EdDSA JWTs signed by the key store's current key.
/// Refresh tokens are `base64url(json claims).hex(hmac-sha256)` under a
/// server secret, so a superseded token still verifies and can be told
/// apart from a forged one.
pub struct SessionTokenCodec {
    key_store: Arc<KeyStore>,
    issuer: String,
    refresh_secret: Vec<u8>,
}

impl SessionTokenCodec {
    pub fn new(
        key_store: Arc<KeyStore>,
        issuer: impl Into<String>,
        refresh_secret: Vec<u8>,
    ) -> Result<Self, SessionError> {
        if refresh_secret.len() < MIN_REFRESH_SECRET_LEN {
            return Err(SessionError::Config(format!(
                "refresh token secret must be at least {MIN_REFRESH_SECRET_LEN} bytes"
            )));
        }
        Ok(SessionTokenCodec {
            key_store,
            issuer: issuer.into(),
            refresh_secret,
        })
    }

    fn refresh_mac(&self, body: &str) -> Result<HmacSha256, SessionError> {
        let mut mac = HmacSha256::new_from_slice(&self.refresh_secret)
            .map_err(|e| SessionError::Internal(e.to_string()))?;
        mac.update(body.as_bytes());
        Ok(mac)
    }
}

impl TokenCodec for SessionTokenCodec {
    fn encode_access(&self, claims: &AccessTokenClaims) -> Result<String, SessionError> {
        let snapshot = self.key_store.snapshot();
        let key = snapshot.current();
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(key.kid().0.clone());
        encode(&header, claims, key.encoding_key())
            .map_err(|e| SessionError::Internal(e.to_string()))
    }

    fn decode_access(&self, token: &str) -> Result<DecodedAccessToken, SessionError> {
        let header = decode_header(token)
            .map_err(|_| SessionError::unauthorized("malformed access token"))?;
        let kid = header
            .kid
            .map(KeyId)
            .ok_or_else(|| SessionError::unauthorized("access token carries no key id"))?;

        let snapshot = self.key_store.snapshot();
        let key = snapshot
            .find(&kid)
            .ok_or_else(|| SessionError::unauthorized("access token signed with unknown key"))?;

        let mut v = Validation::new(Algorithm::EdDSA);
        v.leeway = 0;
        v.set_issuer(&[&self.issuer]);
        v.set_required_spec_claims(&["exp", "iss"]);
        let data = decode::<AccessTokenClaims>(token, key.decoding_key(), &v).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => SessionError::unauthorized("access token expired"),
                _ => SessionError::unauthorized("invalid access token"),
            }
        })?;

        Ok(DecodedAccessToken {
            claims: data.claims,
            signed_with_current_key: Arc::ptr_eq(key, snapshot.current()),
        })
    }

    fn encode_refresh(&self, claims: &RefreshTokenClaims) -> Result<String, SessionError> {
        let json = serde_json::to_vec(claims).map_err(|e| SessionError::Internal(e.to_string()))?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let tag = self.refresh_mac(&body)?.finalize().into_bytes();
        Ok(format!("{}.{}", body, hex::encode(tag)))
    }

    fn decode_refresh(&self, token: &str) -> Result<RefreshTokenClaims, SessionError> {
        let (body, tag_hex) = token
            .split_once('.')
            .ok_or_else(|| SessionError::unauthorized("malformed refresh token"))?;
        let tag =
            hex::decode(tag_hex).map_err(|_| SessionError::unauthorized("malformed refresh token"))?;
        self.refresh_mac(body)?
            .verify_slice(&tag)
            .map_err(|_| SessionError::unauthorized("invalid refresh token"))?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| SessionError::unauthorized("malformed refresh token"))?;
        let claims: RefreshTokenClaims = serde_json::from_slice(&json)
            .map_err(|_| SessionError::unauthorized("malformed refresh token"))?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(SessionError::unauthorized("refresh token expired"));
        }
        Ok(claims)
    }
}
