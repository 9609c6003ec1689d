//! Configuration management
//!
//! All settings come from `APP_`-prefixed environment variables, with
//! defaults suitable for the reference deployment (NFS mount under
//! `/mnt/nfs`, ephemeral staging under `/mnt/staging`).

use blobferry_common::FerryError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default NFS incoming root.
pub const DEFAULT_NFS_INCOMING_DIR: &str = "/mnt/nfs/incoming";

/// Default NFS processing root.
pub const DEFAULT_NFS_PROCESSING_ROOT: &str = "/mnt/nfs/.processing";

/// Default local staging root (ephemeral storage).
pub const DEFAULT_LOCAL_STAGING_ROOT: &str = "/mnt/staging";

/// Default watcher poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_S: f64 = 2.0;

/// Default minimum file age in seconds. Must be at least the NFS mount's
/// attribute-cache timeout (pair with `actimeo=5`).
pub const DEFAULT_MIN_FILE_AGE_S: f64 = 5.0;

/// Default bounded queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2000;

/// Default worker count.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Default per-upload block concurrency hint.
pub const DEFAULT_AZURE_MAX_CONCURRENCY: usize = 8;

/// Default reaper interval in seconds.
pub const DEFAULT_REAPER_INTERVAL_S: f64 = 30.0;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub azure: AzureConfig,
    pub paths: PathsConfig,
    pub watcher: WatcherConfig,
    pub pipeline: PipelineConfig,
    pub reaper: ReaperConfig,
}

/// HTTP control surface binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Azure Blob Storage account, container, and fallback credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Account URL, e.g. `https://myaccount.blob.core.windows.net`
    pub account_url: String,
    pub container: String,
    /// Fallback credential: full connection string
    pub connection_string: Option<String>,
    /// Fallback credential: shared key
    pub account_name: Option<String>,
    pub account_key: Option<String>,
}

/// Filesystem roots. Incoming and processing must live on the same NFS
/// filesystem so the claim rename stays atomic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub nfs_incoming_dir: PathBuf,
    pub nfs_processing_root: PathBuf,
    pub local_staging_root: PathBuf,
}

/// Watcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub poll_interval_s: f64,
    pub min_file_age_s: f64,
    /// Lowercased extensions including the dot (e.g. ".bin"); empty = all
    pub file_extensions: HashSet<String>,
}

/// Queue and worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_queue_size: usize,
    pub worker_concurrency: usize,
    pub azure_max_concurrency: usize,
}

/// Completion-marker reaper tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    pub interval_s: f64,
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_s)
    }

    pub fn min_file_age(&self) -> Duration {
        Duration::from_secs_f64(self.min_file_age_s)
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_s)
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env_or("APP_HOST", DEFAULT_SERVER_HOST),
                port: env_parsed("APP_PORT", DEFAULT_SERVER_PORT),
            },
            azure: AzureConfig {
                account_url: required_env("APP_AZURE_ACCOUNT_URL")?,
                container: required_env("APP_AZURE_CONTAINER")?,
                connection_string: std::env::var("APP_AZURE_CONNECTION_STRING").ok(),
                account_name: std::env::var("APP_AZURE_ACCOUNT_NAME").ok(),
                account_key: std::env::var("APP_AZURE_ACCOUNT_KEY").ok(),
            },
            paths: PathsConfig {
                nfs_incoming_dir: PathBuf::from(env_or(
                    "APP_NFS_INCOMING_DIR",
                    DEFAULT_NFS_INCOMING_DIR,
                )),
                nfs_processing_root: PathBuf::from(env_or(
                    "APP_NFS_PROCESSING_ROOT",
                    DEFAULT_NFS_PROCESSING_ROOT,
                )),
                local_staging_root: PathBuf::from(env_or(
                    "APP_LOCAL_STAGING_ROOT",
                    DEFAULT_LOCAL_STAGING_ROOT,
                )),
            },
            watcher: WatcherConfig {
                poll_interval_s: env_parsed("APP_POLL_INTERVAL_S", DEFAULT_POLL_INTERVAL_S),
                min_file_age_s: env_parsed("APP_MIN_FILE_AGE_S", DEFAULT_MIN_FILE_AGE_S),
                file_extensions: parse_extensions(
                    &std::env::var("APP_FILE_EXTENSIONS").unwrap_or_default(),
                ),
            },
            pipeline: PipelineConfig {
                max_queue_size: env_parsed("APP_MAX_QUEUE_SIZE", DEFAULT_MAX_QUEUE_SIZE),
                worker_concurrency: env_parsed(
                    "APP_WORKER_CONCURRENCY",
                    DEFAULT_WORKER_CONCURRENCY,
                ),
                azure_max_concurrency: env_parsed(
                    "APP_AZURE_MAX_CONCURRENCY",
                    DEFAULT_AZURE_MAX_CONCURRENCY,
                ),
            },
            reaper: ReaperConfig {
                interval_s: env_parsed("APP_REAPER_INTERVAL_S", DEFAULT_REAPER_INTERVAL_S),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.azure.account_url.is_empty() {
            anyhow::bail!("Azure account URL cannot be empty");
        }

        if self.azure.container.is_empty() {
            anyhow::bail!("Azure container cannot be empty");
        }

        if self.watcher.poll_interval_s <= 0.0 {
            anyhow::bail!("Poll interval must be greater than 0");
        }

        if self.watcher.min_file_age_s < 0.0 {
            anyhow::bail!("Minimum file age cannot be negative");
        }

        if self.pipeline.max_queue_size == 0 {
            anyhow::bail!("Queue capacity must be greater than 0");
        }

        if self.pipeline.worker_concurrency == 0 {
            anyhow::bail!("Worker concurrency must be greater than 0");
        }

        if self.pipeline.azure_max_concurrency == 0 {
            anyhow::bail!("Azure upload concurrency must be greater than 0");
        }

        if self.reaper.interval_s <= 0.0 {
            anyhow::bail!("Reaper interval must be greater than 0");
        }

        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn required_env(key: &str) -> Result<String, FerryError> {
    std::env::var(key).map_err(|_| {
        FerryError::config(
            format!("{key} is not set"),
            format!("Set the {key} environment variable"),
        )
    })
}

/// Parse a comma-separated extension allow-list: `".bin,MP4, dat"` becomes
/// `{".bin", ".mp4", ".dat"}`. Empty input means no filtering.
pub fn parse_extensions(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        test_support::test_config_with_roots(std::path::Path::new("/tmp/blobferry-test"))
    }

    #[test]
    fn test_parse_extensions_mixed_forms() {
        let exts = parse_extensions(".bin,MP4, .Dat ,");
        assert_eq!(exts.len(), 3);
        assert!(exts.contains(".bin"));
        assert!(exts.contains(".mp4"));
        assert!(exts.contains(".dat"));
    }

    #[test]
    fn test_parse_extensions_empty_means_all() {
        assert!(parse_extensions("").is_empty());
        assert!(parse_extensions("  ").is_empty());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = test_config();
        config.pipeline.worker_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = test_config();
        config.watcher.poll_interval_s = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = test_config();
        assert_eq!(config.watcher.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.watcher.min_file_age(), Duration::from_secs(5));
        assert_eq!(config.reaper.interval(), Duration::from_secs(30));
    }
}
