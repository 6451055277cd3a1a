//! Vault error types

use thiserror::Error;

/// Closed error set for credential operations. Callers branch on kind:
/// CLI layers map these to exit codes, health checks to issue strings.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Rejected before any crypto or audit work ran (empty id/value,
    /// unsupported id characters).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Integrity failure, duplicate id, oversized value, or rate limit.
    /// Audit-logged with the failure reason before propagating.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("credential expired: {0}")]
    Expired(String),

    /// Construction-time problem: missing master key, bad environment name.
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("audit error: {0}")]
    Audit(#[from] talon_audit::AuditError),
}

impl From<talon_crypto::CryptoError> for CredentialError {
    fn from(e: talon_crypto::CryptoError) -> Self {
        Self::SecurityViolation(e.to_string())
    }
}

pub type CredentialResult<T> = Result<T, CredentialError>;
