use crate::domain_model::PublicKeyInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeConfig {
    pub issuer: String,
    pub access_token_validity_secs: u64,
    pub refresh_token_validity_secs: u64,
    pub anti_csrf_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInfo {
    pub public_key: PublicKeyInfo,
    /// Every key still accepted for verification, current one first.
    pub verification_keys: Vec<PublicKeyInfo>,
    pub config: HandshakeConfig,
}

#[async_trait::async_trait]
pub trait HandshakeService: Send + Sync {
    async fn handshake(&self) -> HandshakeInfo;
}
