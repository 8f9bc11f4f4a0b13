use crate::domain_port::SessionStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically drops sessions whose refresh token has expired.
pub struct SessionReaper {
    store: Arc<dyn SessionStore>,
    interval: Duration,
    cancellation_token: CancellationToken,
}

impl SessionReaper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            interval,
            cancellation_token,
        }
    }

    async fn tick_once(&self) {
        match self.store.prune_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(pruned) => tracing::info!(pruned, "expired sessions pruned"),
            Err(e) => tracing::error!("session pruning failed: {}", e),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("SessionReaper shutting down...");
                    break;
                }
                _ = ticker.tick() => self.tick_once().await,
            }
        }
        Ok(())
    }
}
