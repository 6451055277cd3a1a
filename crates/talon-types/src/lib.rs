//! Shared domain types for the TalonVault credential engine.
//!
//! Defines credential classification enums, per-credential metadata, and the
//! health/statistics types exchanged between the vault façade and its
//! consumers.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

// ─── Credential classification ───────────────────────────────────────────────

/// What kind of secret a credential holds.
///
/// Serialized by snake_case value. Deserialization also accepts legacy
/// records that stored the SCREAMING_CASE variant name; anything else falls
/// back to `ApiKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    #[default]
    ApiKey,
    DatabasePassword,
    ServiceToken,
    EncryptionKey,
    OauthClientSecret,
    Certificate,
    PrivateKey,
    WebhookSecret,
    SessionSecret,
    JwtSecret,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::DatabasePassword => "database_password",
            Self::ServiceToken => "service_token",
            Self::EncryptionKey => "encryption_key",
            Self::OauthClientSecret => "oauth_client_secret",
            Self::Certificate => "certificate",
            Self::PrivateKey => "private_key",
            Self::WebhookSecret => "webhook_secret",
            Self::SessionSecret => "session_secret",
            Self::JwtSecret => "jwt_secret",
        }
    }

    /// Parse a stored string, tolerating legacy SCREAMING_CASE names.
    /// Unrecognized values fall back to the default type.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "api_key" => Self::ApiKey,
            "database_password" => Self::DatabasePassword,
            "service_token" => Self::ServiceToken,
            "encryption_key" => Self::EncryptionKey,
            "oauth_client_secret" => Self::OauthClientSecret,
            "certificate" => Self::Certificate,
            "private_key" => Self::PrivateKey,
            "webhook_secret" => Self::WebhookSecret,
            "session_secret" => Self::SessionSecret,
            "jwt_secret" => Self::JwtSecret,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'de> Deserialize<'de> for CredentialType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&s))
    }
}

/// Security tier of a credential.
///
/// Controls KDF cost and storage durability, not the cipher itself.
/// `Ephemeral` credentials never touch disk; their security comes from
/// non-persistence rather than extra KDF work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Standard,
    High,
    Critical,
    Ephemeral,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Ephemeral => "ephemeral",
        }
    }

    /// Multiplier applied to the base KDF iteration count.
    pub fn kdf_cost_factor(&self) -> u32 {
        match self {
            Self::Standard | Self::Ephemeral => 1,
            Self::High => 2,
            Self::Critical => 5,
        }
    }

    /// True for every level whose envelope is written to disk.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::Ephemeral)
    }

    /// Parse a stored string, tolerating legacy SCREAMING_CASE names.
    /// Unrecognized values fall back to `Standard`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Self::Standard,
            "high" => Self::High,
            "critical" => Self::Critical,
            "ephemeral" => Self::Ephemeral,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'de> Deserialize<'de> for SecurityLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&s))
    }
}

// ─── Credential metadata ─────────────────────────────────────────────────────

/// Everything known about a stored credential except its value.
///
/// Optional and later-added fields carry `#[serde(default)]` so documents
/// written by older builds still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialMetadata {
    /// Caller-assigned key, immutable once stored, unique per environment.
    pub credential_id: String,
    pub credential_type: CredentialType,
    pub security_level: SecurityLevel,
    pub environment: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub rotation_required: bool,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl CredentialMetadata {
    /// Fresh metadata for a newly stored credential.
    pub fn new(
        credential_id: impl Into<String>,
        credential_type: CredentialType,
        security_level: SecurityLevel,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            credential_id: credential_id.into(),
            credential_type,
            security_level,
            environment: environment.into(),
            created_at: Utc::now(),
            expires_at: None,
            last_accessed: None,
            access_count: 0,
            rotation_required: false,
            tags: HashMap::new(),
        }
    }

    /// True once `expires_at` is set and has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    /// Record a successful retrieval.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed = Some(now);
        self.access_count += 1;
    }
}

// ─── Health & statistics ─────────────────────────────────────────────────────

/// Overall vault health, ordered from best to worst so results from
/// independent probes combine with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Error,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Degraded => "degraded",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Result of a vault health check. Reported to the caller, never raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub total_credentials: usize,
    pub rotation_due: usize,
    pub expired: usize,
    pub checked_at: DateTime<Utc>,
}

/// Inventory counts across both storage backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultStats {
    pub total: usize,
    pub persistent: usize,
    pub ephemeral: usize,
    pub expired: usize,
    pub rotation_due: usize,
    /// Count per security level, keyed by wire string.
    pub by_level: HashMap<String, usize>,
    /// Count per credential type, keyed by wire string.
    pub by_type: HashMap<String, usize>,
}
