//! Shared fixtures for TalonVault integration tests.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::Path;

use talon_vault::{
    CredentialType, CredentialVault, RateLimitConfig, SecurityLevel, VaultConfig,
};

/// Master key shared by every suite. Environment isolation must hold even
/// when environments share a key.
pub const TEST_MASTER_KEY: &str = "integration-master-key";

/// Keep CRITICAL-level KDF scaling affordable in tests.
pub const TEST_KDF_ITERATIONS: u32 = 1000;

pub fn vault_config(root: &Path, environment: &str) -> VaultConfig {
    let mut config = VaultConfig::new(root, environment);
    config.master_key = Some(TEST_MASTER_KEY.to_string());
    config.kdf_iterations = TEST_KDF_ITERATIONS;
    config
}

pub fn open_vault(root: &Path, environment: &str) -> CredentialVault {
    CredentialVault::new(vault_config(root, environment)).expect("open vault")
}

pub fn open_vault_with_limit(
    root: &Path,
    environment: &str,
    max_attempts: usize,
    window_secs: u64,
) -> CredentialVault {
    let mut config = vault_config(root, environment);
    config.rate_limit = RateLimitConfig {
        max_attempts,
        window_secs,
    };
    CredentialVault::new(config).expect("open vault")
}

/// Store an API key at the given level with no expiry, tags, or user.
pub fn store_simple(vault: &CredentialVault, id: &str, value: &str, level: SecurityLevel) {
    vault
        .store(
            id,
            value,
            CredentialType::ApiKey,
            level,
            None,
            HashMap::new(),
            None,
        )
        .expect("store");
}

/// Flip one bit of the file at `offset` (clamped to the last byte).
pub fn flip_byte(path: &Path, offset: usize) {
    let mut bytes = std::fs::read(path).expect("read ciphertext");
    let idx = offset.min(bytes.len() - 1);
    bytes[idx] ^= 0x01;
    std::fs::write(path, &bytes).expect("write ciphertext");
}
