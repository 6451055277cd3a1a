//! Vault configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CredentialError, CredentialResult};

/// Configuration for a [`crate::CredentialVault`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Root directory holding one subdirectory per environment.
    pub storage_root: PathBuf,

    /// Environment name (production, staging, development, ...). Becomes a
    /// path component and part of the encryption AAD.
    pub environment: String,

    /// Name of the environment variable holding the master key.
    #[serde(default = "default_master_key_var")]
    pub master_key_var: String,

    /// Direct master key, for embedding. Takes precedence over the
    /// environment variable and is never written by `save`.
    #[serde(skip)]
    pub master_key: Option<String>,

    /// Base PBKDF2 iteration count, scaled up per security level.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_master_key_var() -> String {
    "TALON_MASTER_KEY".to_string()
}

fn default_kdf_iterations() -> u32 {
    talon_crypto::DEFAULT_KDF_ITERATIONS
}

impl VaultConfig {
    pub fn new(storage_root: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            storage_root: storage_root.into(),
            environment: environment.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> CredentialResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| CredentialError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&data)
            .map_err(|e| CredentialError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> CredentialResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| CredentialError::Config(format!("serialize config: {e}")))?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/var/lib/talonvault"),
            environment: "production".to_string(),
            master_key_var: default_master_key_var(),
            master_key: None,
            kdf_iterations: default_kdf_iterations(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Sliding-window retrieval limits, per credential id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_attempts() -> usize {
    100
}

fn default_window_secs() -> u64 {
    3600
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Effectively no limit. For batch tooling that retrieves in bulk.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: usize::MAX,
            window_secs: 1,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
        }
    }
}
