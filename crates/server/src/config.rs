use config::{Config, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Minimum length of the master secret key in bytes. Shorter keys refuse to boot.
pub const MIN_SECRET_KEY_BYTES: usize = 32;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub apple: AppleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub secret_key: SecretString,
    /// Seconds to wait for in-flight requests and deliveries on shutdown.
    #[serde(default = "default_drain_secs")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Product catalog refresh interval, per app.
    #[serde(default = "default_sync_hours")]
    pub interval_hours: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppleConfig {
    /// DER-encoded Apple root CA the JWS certificate chain is pinned to.
    pub root_ca_path: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_sync_hours(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_drain_secs() -> u64 {
    30
}

fn default_sync_hours() -> u64 {
    6
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("OPENCAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Startup invariant: the master key must be present and at least 32 bytes.
    pub fn validate(&self) -> anyhow::Result<()> {
        let key_len = self.server.secret_key.expose_secret().len();
        if key_len < MIN_SECRET_KEY_BYTES {
            anyhow::bail!(
                "server.secret_key must be at least {MIN_SECRET_KEY_BYTES} bytes, got {key_len}"
            );
        }
        Ok(())
    }
}
