use crate::application_impl::KeyStore;
use crate::application_port::{HandshakeConfig, HandshakeInfo, HandshakeService};
use std::sync::Arc;

pub struct KeyStoreHandshakeService {
    key_store: Arc<KeyStore>,
    config: HandshakeConfig,
}

impl KeyStoreHandshakeService {
    pub fn new(key_store: Arc<KeyStore>, config: HandshakeConfig) -> Self {
        Self { key_store, config }
    }
}

#[async_trait::async_trait]
impl HandshakeService for KeyStoreHandshakeService {
    async fn handshake(&self) -> HandshakeInfo {
        let snapshot = self.key_store.snapshot();
        HandshakeInfo {
            public_key: snapshot.current().public_info(),
            verification_keys: snapshot.verification_keys(),
            config: self.config.clone(),
        }
    }
}
