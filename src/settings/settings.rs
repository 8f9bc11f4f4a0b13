use crate::application_port::TheftResponse;
use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub http: Http,
    pub log: Log,
    pub session: Session,
    pub keys: Keys,
    pub refresh: Refresh,
    pub store: Store,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Http {
    pub address: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

impl Http {
    /// Both paths, or `None` to serve plain HTTP.
    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub issuer: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    #[serde(default)]
    pub anti_csrf: bool,
    #[serde(default = "default_theft_response")]
    pub theft_response: TheftResponse,
}

fn default_theft_response() -> TheftResponse {
    TheftResponse::Report
}

#[derive(Debug, Clone, Deserialize)]
pub struct Keys {
    /// 0 disables scheduled rotation.
    pub rotation_interval_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct Refresh {
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    /// Inline secret, takes precedence over `secret_env`.
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_secret_env() -> String {
    "COUNTERSIGN_REFRESH_SECRET".to_string()
}

impl std::fmt::Debug for Refresh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresh")
            .field("secret_env", &self.secret_env)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(debug_assertions)]
const DEV_REFRESH_SECRET: &str = "countersign-dev-refresh-secret";

impl Refresh {
    pub fn resolve_secret(&self) -> Result<Vec<u8>> {
        if let Some(secret) = &self.secret {
            return Ok(secret.clone().into_bytes());
        }
        match std::env::var(&self.secret_env) {
            Ok(secret) => Ok(secret.into_bytes()),
            #[cfg(debug_assertions)]
            Err(_) => {
                tracing::warn!(
                    "{} is not set, using the development refresh secret",
                    self.secret_env
                );
                Ok(DEV_REFRESH_SECRET.as_bytes().to_vec())
            }
            #[cfg(not(debug_assertions))]
            Err(e) => Err(anyhow!("{}: {}", self.secret_env, e)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Store {
    pub backend: String, // "memory", "mysql" or "redis"
    pub mysql_dsn: Option<String>,
    pub redis_dsn: Option<String>,
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,
    /// Seconds between sweeps for expired sessions; 0 disables them.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_redis_prefix() -> String {
    "countersign".to_string()
}

fn default_prune_interval_secs() -> u64 {
    300
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const MINIMAL: &str = r#"
[http]
address = "127.0.0.1:0"

[log]
filter = "info"

[session]
issuer = "settings-test"
access_token_ttl_secs = 60
refresh_token_ttl_secs = 600

[keys]
rotation_interval_secs = 0

[refresh]

[store]
backend = "memory"
"#;

    fn parse_str(toml: &str) -> Result<Settings> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .map_err(|e| anyhow!(e))?
            .try_deserialize()
            .map_err(|e| anyhow!(e))
    }

    #[test]
    fn parses_dev_settings() {
        let settings = parse_settings(Some("settings/dev.toml")).unwrap();
        assert_eq!(settings.store.backend, "memory");
        assert!(settings.http.tls_paths().is_none());
        assert!(settings.session.access_token_ttl_secs > 0);
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let settings = parse_str(MINIMAL).unwrap();
        assert_eq!(settings.session.theft_response, TheftResponse::Report);
        assert_eq!(settings.store.prune_interval_secs, 300);
        assert_eq!(settings.store.redis_prefix, "countersign");
    }

    #[test]
    fn theft_response_is_parsed_at_load() {
        let with = |policy: &str| {
            MINIMAL.replace(
                "refresh_token_ttl_secs = 600",
                &format!("refresh_token_ttl_secs = 600\ntheft_response = \"{policy}\""),
            )
        };
        let settings = parse_str(&with("revoke")).unwrap();
        assert_eq!(settings.session.theft_response, TheftResponse::Revoke);
        assert!(parse_str(&with("ignore")).is_err());
    }

    #[test]
    fn inline_secret_wins_over_env() {
        let refresh = Refresh {
            secret_env: "COUNTERSIGN_TEST_UNSET_VARIABLE".to_string(),
            secret: Some("inline-secret-value".to_string()),
        };
        assert_eq!(refresh.resolve_secret().unwrap(), b"inline-secret-value");
        assert!(!format!("{refresh:?}").contains("inline-secret-value"));
    }
}
