//! Configuration management for imagetext using the prefer crate.
//!
//! Settings are layered: built-in defaults, then a discovered `imagetext`
//! config file, then environment/CLI overrides applied by the binary.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default maximum request body size (16 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Which object store implementation backs the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// S3-compatible endpoint (AWS, LocalStack, MinIO).
    S3,
    /// Directory on local disk.
    Local,
    /// Process-local memory; contents vanish on exit.
    Memory,
}

impl StorageBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackendKind::S3 => "s3",
            StorageBackendKind::Local => "local",
            StorageBackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageBackendKind::S3),
            "local" | "fs" => Ok(StorageBackendKind::Local),
            "memory" | "mem" => Ok(StorageBackendKind::Memory),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Object storage settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackendKind,
    /// Endpoint the server talks to.
    pub endpoint_url: String,
    /// Base address browsers use to fetch images.
    pub public_endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Bucket/container holding the images.
    pub bucket: String,
    /// Root directory for the local backend.
    pub local_root: PathBuf,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database URL (`sqlite:path`).
    pub database_url: String,
    /// Address the web server binds to.
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body in bytes.
    pub max_upload_bytes: usize,
    pub storage: StorageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("imagetext");

        Self {
            database_url: format!("sqlite:{}", data_dir.join("imagetext.db").display()),
            storage: StorageSettings {
                backend: StorageBackendKind::S3,
                endpoint_url: "http://localhost:4566".to_string(),
                public_endpoint_url: "http://localhost:4566".to_string(),
                access_key_id: "test".to_string(),
                secret_access_key: "test".to_string(),
                region: "us-east-1".to_string(),
                bucket: "image-text-bucket".to_string(),
                local_root: data_dir.join("storage"),
            },
            data_dir,
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let mut settings = Self::default();
        settings.set_data_dir(data_dir);
        settings
    }

    /// Point the database and local storage at a new data directory.
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.database_url = format!("sqlite:{}", data_dir.join("imagetext.db").display());
        self.storage.local_root = data_dir.join("storage");
        self.data_dir = data_dir;
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        if self.storage.backend == StorageBackendKind::Local {
            fs::create_dir_all(&self.storage.local_root)?;
        }
        Ok(())
    }
}

/// Storage section of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Option<StorageBackendKind>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub public_endpoint_url: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub local_root: Option<String>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub max_upload_bytes: Option<usize>,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers imagetext config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("imagetext").await {
            Ok(pref_config) => {
                let target: Option<String> = pref_config.get("target").ok();
                let database_url: Option<String> = pref_config.get("database_url").ok();
                let host: Option<String> = pref_config.get("host").ok();
                let port: Option<u16> = pref_config.get("port").ok();
                let max_upload_bytes: Option<usize> =
                    pref_config.get("max_upload_bytes").ok();
                let storage: StorageConfig =
                    pref_config.get("storage").unwrap_or_default();

                Config {
                    target,
                    database_url,
                    host,
                    port,
                    max_upload_bytes,
                    storage,
                }
            }
            Err(_) => {
                tracing::debug!("No imagetext config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.set_data_dir(PathBuf::from(path.as_ref()));
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = url.clone();
        }
        if let Some(ref host) = self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(max) = self.max_upload_bytes {
            settings.max_upload_bytes = max;
        }

        let storage = &self.storage;
        if let Some(backend) = storage.backend {
            settings.storage.backend = backend;
        }
        if let Some(ref endpoint) = storage.endpoint_url {
            settings.storage.endpoint_url = endpoint.clone();
        }
        if let Some(ref public) = storage.public_endpoint_url {
            settings.storage.public_endpoint_url = public.clone();
        }
        if let Some(ref key) = storage.access_key_id {
            settings.storage.access_key_id = key.clone();
        }
        if let Some(ref secret) = storage.secret_access_key {
            settings.storage.secret_access_key = secret.clone();
        }
        if let Some(ref region) = storage.region {
            settings.storage.region = region.clone();
        }
        if let Some(ref bucket) = storage.bucket {
            settings.storage.bucket = bucket.clone();
        }
        if let Some(ref root) = storage.local_root {
            let path = shellexpand::tilde(root);
            settings.storage.local_root = PathBuf::from(path.as_ref());
        }
    }
}

/// Load settings from configuration (async version).
pub async fn load_settings() -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_localstack_deployment() {
        let settings = Settings::default();
        assert_eq!(settings.storage.backend, StorageBackendKind::S3);
        assert_eq!(settings.storage.endpoint_url, "http://localhost:4566");
        assert_eq!(settings.storage.bucket, "image-text-bucket");
        assert_eq!(settings.storage.region, "us-east-1");
        assert_eq!(settings.max_upload_bytes, 16 * 1024 * 1024);
        assert!(settings.database_url.starts_with("sqlite:"));
    }

    #[test]
    fn test_apply_config_overrides() {
        let config = Config {
            target: Some("/tmp/imagetext-test".to_string()),
            port: Some(8080),
            storage: StorageConfig {
                backend: Some(StorageBackendKind::Local),
                bucket: Some("scans".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);

        assert_eq!(settings.data_dir, PathBuf::from("/tmp/imagetext-test"));
        assert_eq!(settings.database_url, "sqlite:/tmp/imagetext-test/imagetext.db");
        assert_eq!(
            settings.storage.local_root,
            PathBuf::from("/tmp/imagetext-test/storage")
        );
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.storage.backend, StorageBackendKind::Local);
        assert_eq!(settings.storage.bucket, "scans");
        // Untouched values keep their defaults
        assert_eq!(settings.storage.region, "us-east-1");
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("S3".parse::<StorageBackendKind>(), Ok(StorageBackendKind::S3));
        assert_eq!("fs".parse::<StorageBackendKind>(), Ok(StorageBackendKind::Local));
        assert_eq!("memory".parse::<StorageBackendKind>(), Ok(StorageBackendKind::Memory));
        assert!("ftp".parse::<StorageBackendKind>().is_err());
    }
}
