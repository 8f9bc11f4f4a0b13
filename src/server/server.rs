use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::settings::Settings;
use sqlx::{MySql, Pool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Server {
    pub session_service: Arc<dyn SessionService>,
    pub handshake_service: Arc<dyn HandshakeService>,
    pub key_store: Arc<KeyStore>,
    rotator_handle: Mutex<Option<JoinHandle<()>>>,
    reaper_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    pool: Option<Pool<MySql>>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let session_config = SessionConfig {
            issuer: settings.session.issuer.clone(),
            access_ttl: Duration::from_secs(settings.session.access_token_ttl_secs),
            refresh_ttl: Duration::from_secs(settings.session.refresh_token_ttl_secs),
            anti_csrf: settings.session.anti_csrf,
            theft_response: settings.session.theft_response,
        };
        session_config.validate()?;

        let mut pool = None;
        let session_store: Arc<dyn SessionStore> = match settings.store.backend.as_str() {
            "memory" => Arc::new(InMemorySessionStore::new()),
            "mysql" => {
                let dsn = settings
                    .store
                    .mysql_dsn
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("store.mysql_dsn is required"))?;
                let mysql_pool = Pool::<MySql>::connect(dsn).await?;
                pool = Some(mysql_pool.clone());
                Arc::new(MySqlSessionStore::new(mysql_pool))
            }
            "redis" => {
                let dsn = settings
                    .store
                    .redis_dsn
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("store.redis_dsn is required"))?;
                let redis_client = redis::Client::open(dsn)?;
                let redis_manager = redis_client.get_connection_manager().await?;
                Arc::new(RedisSessionStore::new(
                    redis_manager,
                    settings.store.redis_prefix.clone(),
                ))
            }
            other => return Err(anyhow::anyhow!("Unknown store backend: {}", other)),
        };

        let key_store = Arc::new(KeyStore::new(session_config.access_ttl)?);
        let refresh_secret = settings.refresh.resolve_secret()?;
        let token_codec: Arc<dyn TokenCodec> = Arc::new(SessionTokenCodec::new(
            key_store.clone(),
            session_config.issuer.clone(),
            refresh_secret,
        )?);

        let handshake_service: Arc<dyn HandshakeService> =
            Arc::new(KeyStoreHandshakeService::new(
                key_store.clone(),
                HandshakeConfig {
                    issuer: session_config.issuer.clone(),
                    access_token_validity_secs: session_config.access_ttl.as_secs(),
                    refresh_token_validity_secs: session_config.refresh_ttl.as_secs(),
                    anti_csrf_enabled: session_config.anti_csrf,
                },
            ));
        let session_service: Arc<dyn SessionService> = Arc::new(SessionManager::new(
            session_store.clone(),
            token_codec,
            key_store.clone(),
            AntiCsrfGuard::new(session_config.anti_csrf),
            session_config,
        ));

        let cancel = CancellationToken::new();
        let rotator_handle = match settings.keys.rotation_interval_secs {
            0 => None,
            secs => {
                let rotator = KeyRotator::new(
                    key_store.clone(),
                    Duration::from_secs(secs),
                    cancel.clone(),
                );
                Some(tokio::spawn(async move {
                    let _ = rotator.run().await;
                }))
            }
        };

        let reaper_handle = match settings.store.prune_interval_secs {
            0 => None,
            secs => {
                let reaper =
                    SessionReaper::new(session_store, Duration::from_secs(secs), cancel.clone());
                Some(tokio::spawn(async move {
                    let _ = reaper.run().await;
                }))
            }
        };

        info!(backend = %settings.store.backend, "server started");

        Ok(Self {
            session_service,
            handshake_service,
            key_store,
            rotator_handle: Mutex::new(rotator_handle),
            reaper_handle: Mutex::new(reaper_handle),
            cancel,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        for (name, slot) in [
            ("rotator", &self.rotator_handle),
            ("reaper", &self.reaper_handle),
        ] {
            let handle = match slot.lock() {
                Ok(mut lock) => lock.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(handle) = handle {
                let r = handle.await;
                info!("{} handle dropped: {:?}", name, r);
            }
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::*;

    fn settings(backend: &str, theft: TheftResponse) -> Settings {
        Settings {
            http: Http {
                address: "127.0.0.1:0".to_string(),
                cert_path: None,
                key_path: None,
            },
            log: Log {
                filter: "info".to_string(),
            },
            session: crate::settings::Session {
                issuer: "server-test".to_string(),
                access_token_ttl_secs: 60,
                refresh_token_ttl_secs: 600,
                anti_csrf: false,
                theft_response: theft,
            },
            keys: Keys {
                rotation_interval_secs: 3600,
            },
            refresh: Refresh {
                secret_env: "COUNTERSIGN_TEST_UNSET_VARIABLE".to_string(),
                secret: Some("server-test-refresh-secret".to_string()),
            },
            store: Store {
                backend: backend.to_string(),
                mysql_dsn: None,
                redis_dsn: None,
                redis_prefix: "test".to_string(),
                prune_interval_secs: 60,
            },
        }
    }

    #[tokio::test]
    async fn memory_backend_starts_and_shuts_down() {
        let server = Server::try_new(&settings("memory", TheftResponse::Revoke)).await.unwrap();
        let info = server.handshake_service.handshake().await;
        assert_eq!(info.config.issuer, "server-test");
        assert_eq!(info.public_key, server.key_store.snapshot().current().public_info());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_unknown_backend() {
        assert!(
            Server::try_new(&settings("sqlite", TheftResponse::Report))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn mysql_backend_requires_dsn() {
        assert!(Server::try_new(&settings("mysql", TheftResponse::Report)).await.is_err());
    }
}
