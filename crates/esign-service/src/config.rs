//! Configuration for esignd

use esign_core::{DispatcherConfig, SigningConfig, DEFAULT_TOKEN_ALPHABET, DEFAULT_TOKEN_LENGTH};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,

    #[serde(default)]
    pub signing: SigningSettings,

    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Requests still running after this are answered with 408; spawned signing work continues.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
            request_timeout_secs: default_request_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Session storage backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (development and tests)
    #[default]
    Memory,

    Postgres {
        url: String,

        #[serde(default = "default_pool_size")]
        max_connections: u32,

        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Where rendered documents and signature images are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSettings {
    #[serde(default = "default_token_length")]
    pub token_length: usize,

    /// Uppercase letters and digits only; submitted codes are upper-cased before comparison.
    #[serde(default = "default_token_alphabet")]
    pub token_alphabet: String,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,

    #[serde(default = "default_signing_lease")]
    pub signing_lease_secs: u64,

    #[serde(default = "default_max_signature_bytes")]
    pub max_signature_bytes: usize,

    #[serde(default = "default_operations_role")]
    pub operations_role: String,

    /// Returns the plaintext code in API responses. Development only.
    #[serde(default)]
    pub expose_token_in_response: bool,

    /// Period of the background state-sync reconciliation; 0 disables it.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_reconcile_batch")]
    pub reconcile_batch: usize,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            token_length: default_token_length(),
            token_alphabet: default_token_alphabet(),
            token_ttl_secs: default_token_ttl(),
            max_attempts: default_max_attempts(),
            render_timeout_secs: default_render_timeout(),
            signing_lease_secs: default_signing_lease(),
            max_signature_bytes: default_max_signature_bytes(),
            operations_role: default_operations_role(),
            expose_token_in_response: false,
            reconcile_interval_secs: default_reconcile_interval(),
            reconcile_batch: default_reconcile_batch(),
        }
    }
}

impl SigningSettings {
    pub fn signing_config(&self) -> SigningConfig {
        SigningConfig {
            token_ttl: chrono::Duration::seconds(saturating_i64(self.token_ttl_secs)),
            max_attempts: self.max_attempts,
            signing_lease: chrono::Duration::seconds(saturating_i64(self.signing_lease_secs)),
            max_signature_bytes: self.max_signature_bytes,
            operations_role: self.operations_role.clone(),
        }
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}

/// Contract data, state transitions and notification delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CollaboratorsConfig {
    /// In-process collaborators, optionally seeded with contract snapshots from a JSON file.
    Memory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixtures: Option<PathBuf>,
    },

    /// The internal data service.
    Http {
        base_url: String,

        #[serde(default = "default_collaborator_timeout")]
        timeout_secs: u64,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_token: Option<String>,
    },
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        CollaboratorsConfig::Memory { fixtures: None }
    }
}

/// Outbox dispatcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_delivery_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_attempts: default_delivery_attempts(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
            claim_lease_secs: default_claim_lease(),
        }
    }
}

impl NotificationSettings {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            batch_size: self.batch_size.max(1),
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_secs(self.base_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            claim_lease: Duration::from_secs(self.claim_lease_secs),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn saturating_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / 1_000)
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_body_size() -> usize {
    4 * 1024 * 1024
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("data/documents")
}

fn default_token_length() -> usize {
    DEFAULT_TOKEN_LENGTH
}

fn default_token_alphabet() -> String {
    DEFAULT_TOKEN_ALPHABET.to_string()
}

fn default_token_ttl() -> u64 {
    24 * 60 * 60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_render_timeout() -> u64 {
    30
}

fn default_signing_lease() -> u64 {
    120
}

fn default_max_signature_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_operations_role() -> String {
    "fulfillment".to_string()
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_reconcile_batch() -> usize {
    50
}

fn default_collaborator_timeout() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_batch_size() -> usize {
    32
}

fn default_delivery_attempts() -> u32 {
    8
}

fn default_base_backoff() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    15 * 60
}

fn default_claim_lease() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Layers built-in defaults, an optional file, then `ESIGN_*` environment variables
    /// (`ESIGN_SIGNING__MAX_ATTEMPTS=5`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&ServiceConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ESIGN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_signing_policy() {
        let config = ServiceConfig::default();
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert!(matches!(
            config.collaborators,
            CollaboratorsConfig::Memory { fixtures: None }
        ));
        assert!(!config.signing.expose_token_in_response);

        let signing = config.signing.signing_config();
        assert_eq!(signing.token_ttl, chrono::Duration::hours(24));
        assert_eq!(signing.max_attempts, 3);
        assert_eq!(signing.signing_lease, chrono::Duration::seconds(120));
        assert_eq!(config.signing.render_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("esignd.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
listen_addr = "0.0.0.0:9000"

[storage]
type = "postgres"
url = "postgres://esign@localhost/esign"

[signing]
max_attempts = 5
expose_token_in_response = true

[collaborators]
type = "http"
base_url = "http://data.internal:8080"
"#
        )
        .unwrap();

        let config = ServiceConfig::load(path.to_str()).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.signing.max_attempts, 5);
        assert!(config.signing.expose_token_in_response);
        assert_eq!(config.signing.token_length, DEFAULT_TOKEN_LENGTH);
        match config.storage {
            StorageConfig::Postgres {
                url,
                max_connections,
                ..
            } => {
                assert_eq!(url, "postgres://esign@localhost/esign");
                assert_eq!(max_connections, 10);
            }
            other => panic!("unexpected storage {other:?}"),
        }
        match config.collaborators {
            CollaboratorsConfig::Http {
                base_url,
                timeout_secs,
                service_token,
            } => {
                assert_eq!(base_url, "http://data.internal:8080");
                assert_eq!(timeout_secs, 10);
                assert!(service_token.is_none());
            }
            other => panic!("unexpected collaborators {other:?}"),
        }
    }

    #[test]
    fn dispatcher_settings_are_clamped() {
        let settings = NotificationSettings {
            poll_interval_ms: 0,
            batch_size: 0,
            max_attempts: 0,
            ..NotificationSettings::default()
        };
        let dispatcher = settings.dispatcher_config();
        assert_eq!(dispatcher.poll_interval, Duration::from_millis(1));
        assert_eq!(dispatcher.batch_size, 1);
        assert_eq!(dispatcher.max_attempts, 1);
    }
}
