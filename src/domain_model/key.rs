use serde::{Deserialize, Serialize};
use std::fmt;

/// Key identifier carried in the `kid` header of every access token.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub String);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public half of a signing key as published by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyInfo {
    pub kid: KeyId,
    pub algorithm: String,
    /// Raw Ed25519 public key, base64url without padding.
    pub public_key: String,
}
