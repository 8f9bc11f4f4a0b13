use crate::application_port::HandshakeInfo;
use crate::domain_model::PublicKeyInfo;
use crate::logger::*;
use tokio::sync::RwLock;

/// Last handshake response seen by the client. Filled on demand, cleared when
/// a verification comes back unauthorised, never refreshed in the background.
#[derive(Debug, Default)]
pub struct HandshakeCache {
    info: RwLock<Option<HandshakeInfo>>,
}

impl HandshakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<HandshakeInfo> {
        self.info.read().await.clone()
    }

    pub async fn store(&self, info: HandshakeInfo) {
        *self.info.write().await = Some(info);
    }

    pub async fn invalidate(&self) {
        if self.info.write().await.take().is_some() {
            debug!("handshake cache invalidated");
        }
    }

    /// Adopts `key` as the current key if it differs from the cached one.
    /// Returns whether the cache changed.
    pub async fn observe_public_key(&self, key: &PublicKeyInfo) -> bool {
        let mut guard = self.info.write().await;
        let Some(info) = guard.as_mut() else {
            return false;
        };
        if info.public_key == *key {
            return false;
        }
        debug!(kid = %key.kid, "signing key changed");
        info.public_key = key.clone();
        if !info.verification_keys.iter().any(|k| k.kid == key.kid) {
            info.verification_keys.insert(0, key.clone());
        }
        true
    }
}
