//! Runtime configuration: credentials, endpoint, bucket and mount path, plus the
//! limits and defaults shared by the CLI.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tracing::debug;

/// Directory holding one file per key. Takes precedence over the environment.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/config-nv";

pub const ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENDPOINT: &str = "AWS_ENDPOINT";
pub const REGION: &str = "AWS_REGION";
pub const BUCKET: &str = "S3_BUCKET";
pub const MOUNT_PATH: &str = "MOUNT_PATH";

/// Signing region of the volume endpoint when `AWS_REGION` is unset.
pub const DEFAULT_REGION: &str = "hcm04";

/// Mount location relative to the home directory when `MOUNT_PATH` is unset.
pub const DEFAULT_MOUNT_SUBDIR: &str = "test/workspace";

/// Default number of concurrent transfers.
pub const DEFAULT_TRANSFER_THREADS: usize = 4;

/// Minimum allowed concurrent transfers.
pub const MIN_TRANSFER_THREADS: usize = 1;

/// Maximum allowed concurrent transfers.
pub const MAX_TRANSFER_THREADS: usize = 32;

pub fn clamp_threads(v: usize) -> usize {
    v.clamp(MIN_TRANSFER_THREADS, MAX_TRANSFER_THREADS)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required (set via {DEFAULT_CONFIG_DIR}/{0} file or environment variable)")]
    Missing(&'static str),
    #[error("failed to get home directory for the default {MOUNT_PATH}")]
    NoHome,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,
    pub region: String,
    /// Optional: without a bucket `ls` lists the available buckets instead.
    pub bucket: Option<String>,
    pub mount_path: Utf8PathBuf,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("mount_path", &self.mount_path)
            .finish()
    }
}

impl Config {
    /// Load from `/etc/config-nv` with the process environment as fallback.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Utf8Path::new(DEFAULT_CONFIG_DIR), |key| {
            std::env::var(key).ok()
        })
    }

    /// Each key is read from `<dir>/<KEY>` (whitespace-trimmed) first, then from `env`.
    /// Empty values count as unset.
    pub fn load_from<F>(dir: &Utf8Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            let path = dir.join(key);
            let value = match fs::read_to_string(&path) {
                Ok(content) => {
                    debug!("Read {} from {}", key, path);
                    Some(content.trim().to_string())
                }
                Err(_) => env(key).map(|v| v.trim().to_string()),
            };
            value.filter(|v| !v.is_empty())
        };

        let mount_path = match get(MOUNT_PATH) {
            Some(p) => Utf8PathBuf::from(p),
            None => {
                let home = env("HOME").filter(|h| !h.is_empty()).ok_or(ConfigError::NoHome)?;
                Utf8PathBuf::from(home).join(DEFAULT_MOUNT_SUBDIR)
            }
        };

        let cfg = Self {
            access_key_id: get(ACCESS_KEY_ID).unwrap_or_default(),
            secret_access_key: get(SECRET_ACCESS_KEY).unwrap_or_default(),
            endpoint: get(ENDPOINT).unwrap_or_default(),
            region: get(REGION).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket: get(BUCKET),
            mount_path,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Credentials and endpoint are mandatory; the bucket is checked per command.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key_id.is_empty() {
            return Err(ConfigError::Missing(ACCESS_KEY_ID));
        }
        if self.secret_access_key.is_empty() {
            return Err(ConfigError::Missing(SECRET_ACCESS_KEY));
        }
        if self.endpoint.is_empty() {
            return Err(ConfigError::Missing(ENDPOINT));
        }
        Ok(())
    }

    pub fn require_bucket(&self) -> Result<&str, ConfigError> {
        self.bucket.as_deref().ok_or(ConfigError::Missing(BUCKET))
    }
}
