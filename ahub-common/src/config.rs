//! Configuration loading
//!
//! Resolution order, highest priority first:
//! 1. Command-line arguments (applied by each binary after loading)
//! 2. Environment variables (`AHUB_*`, plus the standard `AWS_*` credentials)
//! 3. TOML config file
//! 4. Compiled defaults

use crate::sigv4::Credentials;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AHUB_CONFIG";

/// Longest presigned URL lifetime SigV4 permits (7 days)
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 604_800;

/// Top-level configuration shared by `ahub-api` and `ahub-worker`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub aws: AwsConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub import: ImportConfig,
    pub webhooks: WebhookConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the REST API
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5780".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: 10,
        }
    }
}

/// Credentials shared by the S3 and SQS clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }
}

impl AwsConfig {
    pub fn has_credentials(&self) -> bool {
        self.access_key_id.as_deref().is_some_and(|k| !k.trim().is_empty())
            && self.secret_access_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(key), Some(secret)) if self.has_credentials() => Ok(Credentials {
                access_key_id: key.trim().to_string(),
                secret_access_key: secret.trim().to_string(),
                session_token: self.session_token.clone().filter(|t| !t.trim().is_empty()),
            }),
            _ => Err(Error::Config("AWS credentials are not configured".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub bucket: Option<String>,
    /// Overrides `aws.region` for the bucket
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores; switches to path-style URLs
    pub endpoint: Option<String>,
    pub presign_expiry_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            bucket: None,
            region: None,
            endpoint: None,
            presign_expiry_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    #[default]
    Memory,
    Sqs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub kind: QueueKind,
    /// SQS queue URL (`https://sqs.<region>.amazonaws.com/<account>/<name>`)
    pub url: Option<String>,
    /// Overrides `aws.region` for the queue
    pub region: Option<String>,
    /// Long-poll wait (SQS allows 0..=20)
    pub wait_time_secs: u64,
    /// Messages per receive (SQS allows 1..=10)
    pub max_messages: u32,
    pub visibility_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: QueueKind::Memory,
            url: None,
            region: None,
            wait_time_secs: 20,
            max_messages: 10,
            visibility_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Rows upserted per transaction
    pub batch_size: usize,
    /// Row errors kept on a job (further errors are only counted)
    pub max_row_errors: usize,
    pub max_file_bytes: u64,
    /// Rows returned by the import preview
    pub preview_rows: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_row_errors: 100,
            max_file_bytes: 50 * 1024 * 1024,
            preview_rows: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// When set, email-event webhooks must carry a matching HMAC-SHA256 signature
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment, then validate
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match locate_config_file(explicit_path)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply environment overrides; `lookup` is `std::env::var` outside tests
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AHUB_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("AHUB_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = get("AWS_REGION").or_else(|| get("AWS_DEFAULT_REGION")) {
            self.aws.region = v;
        }
        if let Some(v) = get("AWS_ACCESS_KEY_ID") {
            self.aws.access_key_id = Some(v);
        }
        if let Some(v) = get("AWS_SECRET_ACCESS_KEY") {
            self.aws.secret_access_key = Some(v);
        }
        if let Some(v) = get("AWS_SESSION_TOKEN") {
            self.aws.session_token = Some(v);
        }
        if let Some(v) = get("AHUB_STORAGE_KIND") {
            match v.to_lowercase().as_str() {
                "s3" => self.storage.kind = StorageKind::S3,
                "memory" => self.storage.kind = StorageKind::Memory,
                other => debug!("Ignoring unknown AHUB_STORAGE_KIND={}", other),
            }
        }
        if let Some(v) = get("AHUB_S3_BUCKET") {
            self.storage.bucket = Some(v);
        }
        if let Some(v) = get("AHUB_S3_ENDPOINT") {
            self.storage.endpoint = Some(v);
        }
        if let Some(v) = get("AHUB_QUEUE_KIND") {
            match v.to_lowercase().as_str() {
                "sqs" => self.queue.kind = QueueKind::Sqs,
                "memory" => self.queue.kind = QueueKind::Memory,
                other => debug!("Ignoring unknown AHUB_QUEUE_KIND={}", other),
            }
        }
        if let Some(v) = get("AHUB_QUEUE_URL") {
            self.queue.url = Some(v);
        }
        if let Some(v) = get("AHUB_WEBHOOK_SECRET") {
            self.webhooks.signing_secret = Some(v);
        }
        if let Some(v) = get("AHUB_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Reject incoherent combinations before anything connects
    pub fn validate(&self) -> Result<()> {
        if self.storage.presign_expiry_secs == 0
            || self.storage.presign_expiry_secs > MAX_PRESIGN_EXPIRY_SECS
        {
            return Err(Error::Config(format!(
                "storage.presign_expiry_secs must be within 1..={}",
                MAX_PRESIGN_EXPIRY_SECS
            )));
        }

        if self.storage.kind == StorageKind::S3 {
            if self.storage.bucket.as_deref().map_or(true, |b| b.trim().is_empty()) {
                return Err(Error::Config("storage.kind = \"s3\" requires storage.bucket".to_string()));
            }
            if !self.aws.has_credentials() {
                return Err(Error::Config(
                    "storage.kind = \"s3\" requires AWS credentials (aws.access_key_id / aws.secret_access_key or AWS_* env)".to_string(),
                ));
            }
        }

        if self.queue.kind == QueueKind::Sqs {
            if self.queue.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                return Err(Error::Config("queue.kind = \"sqs\" requires queue.url".to_string()));
            }
            if !self.aws.has_credentials() {
                return Err(Error::Config("queue.kind = \"sqs\" requires AWS credentials".to_string()));
            }
        }

        if self.queue.wait_time_secs > 20 {
            return Err(Error::Config("queue.wait_time_secs must be within 0..=20".to_string()));
        }
        if !(1..=10).contains(&self.queue.max_messages) {
            return Err(Error::Config("queue.max_messages must be within 1..=10".to_string()));
        }
        if self.import.batch_size == 0 {
            return Err(Error::Config("import.batch_size must be positive".to_string()));
        }

        Ok(())
    }

    pub fn storage_region(&self) -> &str {
        self.storage.region.as_deref().unwrap_or(&self.aws.region)
    }

    pub fn queue_region(&self) -> &str {
        self.queue.region.as_deref().unwrap_or(&self.aws.region)
    }
}

/// Find the config file: explicit path, `AHUB_CONFIG`, user config dir, then /etc
fn locate_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit_path {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found: {}", path.display())));
        }
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(Error::Config(format!(
                "{} points to a missing file: {}",
                CONFIG_ENV_VAR,
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("ahub").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let system_config = PathBuf::from("/etc/ahub/config.toml");
    if system_config.exists() {
        return Ok(Some(system_config));
    }

    Ok(None)
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ahub"))
        .unwrap_or_else(|| PathBuf::from("./ahub_data"))
        .join("ahub.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind, "127.0.0.1:5780");
        assert_eq!(config.storage.kind, StorageKind::Memory);
        assert_eq!(config.queue.kind, QueueKind::Memory);
        assert_eq!(config.import.batch_size, 500);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            bind = "0.0.0.0:8080"

            [import]
            batch_size = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.import.batch_size, 50);
        assert_eq!(config.import.max_row_errors, 100);
        assert_eq!(config.storage.presign_expiry_secs, 900);
    }

    #[test]
    fn test_env_overrides_toml() {
        let mut config = AppConfig::from_toml_str(
            r#"
            [storage]
            kind = "memory"
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("AHUB_STORAGE_KIND", "s3"),
            ("AHUB_S3_BUCKET", "contacts-uploads"),
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_REGION", "eu-west-1"),
            ("AHUB_LOG_LEVEL", ""),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.storage.kind, StorageKind::S3);
        assert_eq!(config.storage.bucket.as_deref(), Some("contacts-uploads"));
        assert_eq!(config.storage_region(), "eu-west-1");
        // Empty values are ignored
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_s3_without_bucket_rejected() {
        let mut config = AppConfig::default();
        config.storage.kind = StorageKind::S3;
        config.aws.access_key_id = Some("AKID".to_string());
        config.aws.secret_access_key = Some("secret".to_string());

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.bucket"));
    }

    #[test]
    fn test_sqs_without_url_rejected() {
        let mut config = AppConfig::default();
        config.queue.kind = QueueKind::Sqs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_presign_expiry_bounds() {
        let mut config = AppConfig::default();
        config.storage.presign_expiry_secs = MAX_PRESIGN_EXPIRY_SECS + 1;
        assert!(config.validate().is_err());

        config.storage.presign_expiry_secs = MAX_PRESIGN_EXPIRY_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_region_overrides() {
        let mut config = AppConfig::default();
        config.queue.region = Some("ap-south-1".to_string());
        assert_eq!(config.storage_region(), "us-east-1");
        assert_eq!(config.queue_region(), "ap-south-1");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/ahub.toml")));
        assert!(result.is_err());
    }
}
