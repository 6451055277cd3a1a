//! TalonVault — envelope-encrypted credential management.
//!
//! Per-credential security levels select KDF cost and persistence, a
//! sliding-window rate limiter bounds retrievals, and every operation lands
//! in a pipe-delimited monthly audit trail. Consumed as a library by the CLI
//! and HTTP layers.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
pub mod vault;

pub use config::{RateLimitConfig, VaultConfig};
pub use error::{CredentialError, CredentialResult};
pub use vault::{CredentialVault, BACKUP_RETENTION_DAYS, DEV_ENVIRONMENT};

pub use talon_types::{
    CredentialMetadata, CredentialType, HealthCheckResult, HealthStatus, SecurityLevel, VaultStats,
};

/// Maximum credential value size in bytes.
pub const MAX_CREDENTIAL_BYTES: usize = 64 * 1024;

/// Per-environment directory layout under the storage root.
pub const ENCRYPTED_DIR: &str = "encrypted";
pub const METADATA_DIR: &str = "metadata";
pub const AUDIT_DIR: &str = "audit";

/// Single metadata document per environment.
pub const METADATA_FILE: &str = "credentials_metadata.json";
