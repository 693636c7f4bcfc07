//! Configuration loading.
//!
//! `Config` mirrors the optional TOML file; `Settings` is the resolved value
//! the rest of the crate consumes. Resolution order is defaults, then the
//! file, then environment variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;
use crate::work::RetryPolicy;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "ocrvault.db";

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "ocrvault.toml";

/// Minimum confidence for the first selection tier.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 70.0;

pub const DEFAULT_S3_REGION: &str = "us-east-1";

const BLOBS_SUBDIR: &str = "blobs";
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// On-disk configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub selection: SelectionSection,
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// `local` or `s3`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
}

impl Config {
    /// Load a TOML config file.
    pub async fn load_from_path(path: &Path) -> Result<Self, AppError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::configuration("config_file", format!("failed to read {}", path.display()))
                .caused_by(e)
        })?;

        let mut config: Config = toml::from_str(&contents).map_err(|e| {
            AppError::configuration("config_file", format!("failed to parse {}", path.display()))
                .caused_by(e)
        })?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory used to resolve relative paths in the file.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
        let path = Path::new(path_str);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply file values on top of `settings`.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        let base_dir = self.base_dir().unwrap_or_else(|| PathBuf::from("."));

        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = Self::resolve_path(data_dir, &base_dir);
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }

        let storage = &self.storage;
        if let Some(ref kind) = storage.storage_type {
            settings.storage.storage_type = kind.clone();
        }
        if let Some(ref path) = storage.local_path {
            settings.storage.local_path = Some(Self::resolve_path(path, &base_dir));
        }
        settings.storage.bucket = storage.bucket.clone().or(settings.storage.bucket.take());
        settings.storage.endpoint = storage.endpoint.clone().or(settings.storage.endpoint.take());
        if let Some(ref region) = storage.region {
            settings.storage.region = region.clone();
        }
        settings.storage.access_key_id = storage
            .access_key_id
            .clone()
            .or(settings.storage.access_key_id.take());
        settings.storage.secret_access_key = storage
            .secret_access_key
            .clone()
            .or(settings.storage.secret_access_key.take());
        if let Some(secs) = storage.timeout_seconds {
            settings.storage.timeout = Duration::from_secs(secs);
        }

        if let Some(max_retries) = self.retry.max_retries {
            settings.retry.max_retries = max_retries;
        }
        if let Some(secs) = self.retry.backoff_seconds {
            settings.retry.base_delay = Duration::from_secs_f64(secs.max(0.0));
        }
        if let Some(factor) = self.retry.factor {
            settings.retry.factor = factor;
        }
        if let Some(secs) = self.retry.max_delay_seconds {
            settings.retry.max_delay = Duration::from_secs_f64(secs.max(0.0));
        }

        if let Some(threshold) = self.selection.confidence_threshold {
            settings.confidence_threshold = threshold;
        }
    }
}

/// Storage settings before validation.
#[derive(Clone)]
pub struct StorageSettings {
    pub storage_type: String,
    /// Root for the local backend (defaults to `<data_dir>/blobs`).
    pub local_path: Option<PathBuf>,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            storage_type: "local".to_string(),
            local_path: None,
            bucket: None,
            endpoint: None,
            region: DEFAULT_S3_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
        }
    }
}

/// Validated S3 connection parameters.
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: Url,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub timeout: Duration,
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("storage_type", &self.storage_type)
            .field("local_path", &self.local_path)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "***"))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Validated backend choice.
#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    Local { root: PathBuf },
    S3(S3Config),
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database URL (overrides `<data_dir>/ocrvault.db` if set).
    pub database_url: Option<String>,
    pub storage: StorageSettings,
    pub retry: RetryPolicy,
    pub confidence_threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("ocrvault"))
            .unwrap_or_else(|| PathBuf::from(".ocrvault"));

        Self {
            data_dir,
            database_url: None,
            storage: StorageSettings::default(),
            retry: RetryPolicy::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl Settings {
    /// Create settings rooted at a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Resolve settings from defaults, an optional config file and the environment.
    pub async fn load(config_path: Option<&Path>) -> Result<Self, AppError> {
        let mut settings = Settings::default();

        let default_path = PathBuf::from(DEFAULT_CONFIG_FILENAME);
        let path = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None if default_path.exists() => Some(default_path),
            None => None,
        };

        if let Some(path) = path {
            let config = Config::load_from_path(&path).await?;
            config.apply_to_settings(&mut settings);
            tracing::debug!("Loaded config from {}", path.display());
        }

        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(kind) = get("STORAGE_TYPE") {
            self.storage.storage_type = kind;
        }
        if let Some(path) = get("LOCAL_STORAGE_PATH") {
            self.storage.local_path = Some(PathBuf::from(path));
        }
        if let Some(bucket) = get("S3_BUCKET_NAME") {
            self.storage.bucket = Some(bucket);
        }
        if let Some(endpoint) = get("S3_ENDPOINT_URL") {
            self.storage.endpoint = Some(endpoint);
        }
        if let Some(region) = get("S3_REGION") {
            self.storage.region = region;
        }
        if let Some(key) = get("S3_ACCESS_KEY_ID") {
            self.storage.access_key_id = Some(key);
        }
        if let Some(secret) = get("S3_SECRET_ACCESS_KEY") {
            self.storage.secret_access_key = Some(secret);
        }
        if let Some(raw) = get("CONNECTION_TIMEOUT_SECONDS") {
            self.storage.timeout = Duration::from_secs(parse_env("CONNECTION_TIMEOUT_SECONDS", &raw)?);
        }
        if let Some(raw) = get("MAX_RETRIES") {
            self.retry.max_retries = parse_env("MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("RETRY_BACKOFF_SECONDS") {
            let secs: f64 = parse_env("RETRY_BACKOFF_SECONDS", &raw)?;
            self.retry.base_delay = Duration::from_secs_f64(secs.max(0.0));
        }
        if let Some(raw) = get("CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_env("CONFIDENCE_THRESHOLD", &raw)?;
        }
        Ok(())
    }

    /// Database URL, constructed from the data directory if not explicitly set.
    pub fn database_url(&self) -> String {
        match self.database_url {
            Some(ref url) => url.clone(),
            None => {
                let path = self.data_dir.join(DEFAULT_DATABASE_FILENAME);
                format!("sqlite:{}", path.display())
            }
        }
    }

    /// Root directory for the local backend.
    pub fn local_storage_root(&self) -> PathBuf {
        self.storage
            .local_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(BLOBS_SUBDIR))
    }

    /// Validate storage configuration, failing fast on incomplete remote setup.
    pub fn storage_backend(&self) -> Result<StorageBackendConfig, AppError> {
        let storage = &self.storage;
        match storage.storage_type.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageBackendConfig::Local {
                root: self.local_storage_root(),
            }),
            "s3" => {
                let bucket = required(&storage.bucket, "S3_BUCKET_NAME")?;
                let access_key_id = required(&storage.access_key_id, "S3_ACCESS_KEY_ID")?;
                let secret_access_key =
                    required(&storage.secret_access_key, "S3_SECRET_ACCESS_KEY")?;

                let region = storage.region.trim();
                if region.is_empty() {
                    return Err(AppError::configuration(
                        "S3_REGION",
                        "S3 storage requires a region",
                    ));
                }

                let endpoint_raw = match storage.endpoint {
                    Some(ref e) if !e.trim().is_empty() => e.trim().to_string(),
                    _ => format!("https://s3.{}.amazonaws.com", region),
                };
                let endpoint = Url::parse(&endpoint_raw).map_err(|e| {
                    AppError::configuration("S3_ENDPOINT_URL", "S3 endpoint is not a valid URL")
                        .caused_by(e)
                })?;
                if !matches!(endpoint.scheme(), "http" | "https") || endpoint.host_str().is_none() {
                    return Err(AppError::configuration(
                        "S3_ENDPOINT_URL",
                        "S3 endpoint must be an absolute http(s) URL",
                    ));
                }

                Ok(StorageBackendConfig::S3(S3Config {
                    bucket,
                    endpoint,
                    region: region.to_string(),
                    access_key_id,
                    secret_access_key,
                    timeout: storage.timeout,
                }))
            }
            other => Err(AppError::configuration(
                "STORAGE_TYPE",
                format!("unsupported storage type '{}' (expected local or s3)", other),
            )),
        }
    }
}

fn required(value: &Option<String>, key: &str) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(AppError::configuration(
            key,
            format!("S3 storage requires {}", key),
        )),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, AppError> {
    raw.trim().parse().map_err(|_| {
        AppError::configuration(key, format!("invalid value for {}: {}", key, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_local_is_default() {
        let settings = Settings::with_data_dir(PathBuf::from("/tmp/ocrvault-test"));
        match settings.storage_backend().unwrap() {
            StorageBackendConfig::Local { root } => {
                assert_eq!(root, PathBuf::from("/tmp/ocrvault-test/blobs"))
            }
            other => panic!("unexpected backend: {:?}", other),
        }
        assert_eq!(
            settings.database_url(),
            "sqlite:/tmp/ocrvault-test/ocrvault.db"
        );
    }

    #[test]
    fn test_incomplete_s3_fails_fast() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[("STORAGE_TYPE", "s3"), ("S3_BUCKET_NAME", "docs")]))
            .unwrap();

        let err = settings.storage_backend().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retryable());
        assert_eq!(err.context()["config_key"], "S3_ACCESS_KEY_ID");
    }

    #[test]
    fn test_complete_s3_uses_regional_endpoint() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("STORAGE_TYPE", "s3"),
                ("S3_BUCKET_NAME", "docs"),
                ("S3_ACCESS_KEY_ID", "AKID"),
                ("S3_SECRET_ACCESS_KEY", "secret"),
                ("S3_REGION", "eu-west-1"),
            ]))
            .unwrap();

        match settings.storage_backend().unwrap() {
            StorageBackendConfig::S3(cfg) => {
                assert_eq!(cfg.bucket, "docs");
                assert_eq!(cfg.endpoint.as_str(), "https://s3.eu-west-1.amazonaws.com/");
                assert_eq!(cfg.timeout, Duration::from_secs(30));
            }
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn test_bad_endpoint_and_type_rejected() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("STORAGE_TYPE", "s3"),
                ("S3_BUCKET_NAME", "docs"),
                ("S3_ACCESS_KEY_ID", "AKID"),
                ("S3_SECRET_ACCESS_KEY", "secret"),
                ("S3_ENDPOINT_URL", "ftp://minio.local"),
            ]))
            .unwrap();
        assert!(settings.storage_backend().is_err());

        settings.storage.storage_type = "gcs".to_string();
        let err = settings.storage_backend().unwrap_err();
        assert_eq!(err.context()["config_key"], "STORAGE_TYPE");
    }

    #[test]
    fn test_invalid_numeric_env_is_configuration_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(env(&[("MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_file_then_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ocrvault.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "data"

[storage]
type = "local"
local_path = "store"

[retry]
max_retries = 5

[selection]
confidence_threshold = 80.0
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);
        settings
            .apply_env(env(&[("CONFIDENCE_THRESHOLD", "75")]))
            .unwrap();

        assert_eq!(settings.data_dir, dir.path().join("data"));
        assert_eq!(settings.local_storage_root(), dir.path().join("store"));
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.confidence_threshold, 75.0);
    }
}
