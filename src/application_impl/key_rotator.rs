use crate::application_impl::KeyStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Rotates the signing key on a fixed schedule until cancelled.
pub struct KeyRotator {
    key_store: Arc<KeyStore>,
    interval: Duration,
    cancellation_token: CancellationToken,
}

impl KeyRotator {
    pub fn new(
        key_store: Arc<KeyStore>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            key_store,
            interval,
            cancellation_token,
        }
    }

    fn tick_once(&self) {
        if let Err(e) = self.key_store.rotate() {
            tracing::error!("key rotation failed: {}", e);
        }
        self.key_store.prune_expired(Utc::now());
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately; the initial key is fresh.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("KeyRotator shutting down...");
                    break;
                }
                _ = ticker.tick() => self.tick_once(),
            }
        }
        Ok(())
    }
}
