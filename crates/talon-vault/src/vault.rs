//! Credential vault façade.
//!
//! Orchestrates the crypto core, storage backends, rate limiter, and audit
//! trail behind one public API. All state mutations happen under a single
//! coarse lock; credential operations are low-frequency, so simplicity wins
//! over throughput here.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use talon_audit::{correlation_hash, AuditEntry, AuditEvent, AuditLog, AuditOutcome};
use talon_crypto::{EnvelopeCipher, MasterKey};
use talon_entropy::StrengthVerdict;
use talon_persist::secure_dir;
use talon_types::{
    CredentialMetadata, CredentialType, HealthCheckResult, HealthStatus, SecurityLevel, VaultStats,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::error::{CredentialError, CredentialResult};
use crate::ratelimit::RateLimiter;
use crate::store::{CredentialStore, EphemeralStore, PersistentStore};
use crate::{AUDIT_DIR, ENCRYPTED_DIR, MAX_CREDENTIAL_BYTES, METADATA_DIR};

/// Environment in which a missing master key is auto-generated instead of
/// fatal.
pub const DEV_ENVIRONMENT: &str = "development";

/// Backup credentials created by rotation expire after this many days.
pub const BACKUP_RETENTION_DAYS: i64 = 30;

const MAX_ID_LEN: usize = 128;

/// Auto-generated development master key, shared by every vault in this
/// process for its lifetime. Never persisted.
static DEV_MASTER_KEY: OnceLock<String> = OnceLock::new();

// ─── Vault ───────────────────────────────────────────────────────────────────

struct VaultState {
    ephemeral: EphemeralStore,
    persistent: PersistentStore,
    limiter: RateLimiter,
}

impl VaultState {
    fn backend(&mut self, level: SecurityLevel) -> &mut dyn CredentialStore {
        if level.is_persistent() {
            &mut self.persistent
        } else {
            &mut self.ephemeral
        }
    }

    fn metadata(&self, credential_id: &str) -> Option<&CredentialMetadata> {
        self.ephemeral
            .get(credential_id)
            .or_else(|| self.persistent.get(credential_id))
    }

    fn contains(&self, credential_id: &str) -> bool {
        self.ephemeral.contains(credential_id) || self.persistent.contains(credential_id)
    }

    fn level_string(&self, credential_id: &str) -> String {
        self.metadata(credential_id)
            .map(|m| m.security_level.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

pub struct CredentialVault {
    config: VaultConfig,
    env_root: std::path::PathBuf,
    cipher: EnvelopeCipher,
    audit: AuditLog,
    state: Mutex<VaultState>,
}

/// Redacting `Debug`: names the environment and root, never key material or
/// cached envelopes.
impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("environment", &self.config.environment)
            .field("storage_root", &self.config.storage_root)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Open (or initialize) the vault for `config.environment` under
    /// `config.storage_root`, creating the directory layout with owner-only
    /// permissions.
    pub fn new(config: VaultConfig) -> CredentialResult<Self> {
        validate_environment(&config.environment)?;
        let master = resolve_master_key(&config)?;

        let env_root = config.storage_root.join(&config.environment);
        secure_dir(&config.storage_root)?;
        secure_dir(&env_root)?;
        secure_dir(&env_root.join(ENCRYPTED_DIR))?;
        secure_dir(&env_root.join(METADATA_DIR))?;
        secure_dir(&env_root.join(AUDIT_DIR))?;

        let cipher = EnvelopeCipher::new(
            MasterKey::new(master.into_bytes()),
            config.environment.as_str(),
            config.kdf_iterations,
        );
        let audit = AuditLog::new(env_root.join(AUDIT_DIR));
        let persistent = PersistentStore::open(&env_root);
        let limiter = RateLimiter::new(&config.rate_limit);

        info!(
            environment = %config.environment,
            root = %config.storage_root.display(),
            credentials = persistent.len(),
            "credential vault initialized"
        );

        Ok(Self {
            cipher,
            audit,
            env_root,
            state: Mutex::new(VaultState {
                ephemeral: EphemeralStore::default(),
                persistent,
                limiter,
            }),
            config,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.config.environment
    }

    /// This environment's directory under the storage root.
    pub fn env_root(&self) -> &Path {
        &self.env_root
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    // ─── Core operations ─────────────────────────────────────────────────

    /// Encrypt and store a new credential. Fails if the id already exists in
    /// either backend. EPHEMERAL credentials live in memory only; every
    /// other level writes a ciphertext file plus the metadata document.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        credential_id: &str,
        value: &str,
        credential_type: CredentialType,
        security_level: SecurityLevel,
        expires_at: Option<DateTime<Utc>>,
        tags: HashMap<String, String>,
        user_id: Option<&str>,
    ) -> CredentialResult<()> {
        validate_id(credential_id)?;
        if value.is_empty() {
            return Err(CredentialError::InvalidInput(
                "credential value is empty".to_string(),
            ));
        }

        let mut state = self.state.lock();

        if value.len() > MAX_CREDENTIAL_BYTES {
            self.audit.append(
                &self
                    .audit_entry(
                        AuditEvent::Store,
                        credential_id,
                        user_id,
                        security_level.as_str(),
                        AuditOutcome::Failed,
                    )
                    .with_details(serde_json::json!({
                        "reason": "oversized",
                        "bytes": value.len(),
                        "limit": MAX_CREDENTIAL_BYTES,
                    })),
            )?;
            return Err(CredentialError::SecurityViolation(format!(
                "credential value is {} bytes, limit is {MAX_CREDENTIAL_BYTES}",
                value.len()
            )));
        }

        if state.contains(credential_id) {
            self.audit.append(
                &self
                    .audit_entry(
                        AuditEvent::Store,
                        credential_id,
                        user_id,
                        security_level.as_str(),
                        AuditOutcome::Failed,
                    )
                    .with_details(serde_json::json!({"reason": "duplicate_id"})),
            )?;
            return Err(CredentialError::SecurityViolation(format!(
                "credential '{credential_id}' already exists"
            )));
        }

        let report = talon_entropy::assess(value);
        if security_level.is_persistent() && report.verdict == StrengthVerdict::Weak {
            warn!(
                credential_id = %credential_id,
                score = report.score,
                "storing weak persistent credential"
            );
        }

        let mut metadata = CredentialMetadata::new(
            credential_id,
            credential_type,
            security_level,
            self.config.environment.as_str(),
        );
        metadata.expires_at = expires_at;
        metadata.tags = tags;

        let sealed = self.cipher.seal(value.as_bytes(), security_level)?;
        let backend = state.backend(security_level);
        backend.put(metadata, &sealed)?;
        backend.persist()?;

        self.audit.append(
            &self
                .audit_entry(
                    AuditEvent::Store,
                    credential_id,
                    user_id,
                    security_level.as_str(),
                    AuditOutcome::Success,
                )
                .with_details(serde_json::json!({
                    "bytes": value.len(),
                    "credential_type": credential_type.as_str(),
                    "correlation_hash": correlation_hash(value),
                    "strength": report.verdict.to_string(),
                })),
        )?;
        info!(credential_id = %credential_id, level = %security_level, "credential stored");
        Ok(())
    }

    /// Decrypt and return a credential value. Rate-limited per id; a
    /// rejected attempt does not extend the lockout. Each successful read
    /// bumps the access metadata.
    pub fn retrieve(
        &self,
        credential_id: &str,
        user_id: Option<&str>,
    ) -> CredentialResult<Zeroizing<String>> {
        validate_id(credential_id)?;
        let mut state = self.state.lock();

        if !state.limiter.check_and_record(credential_id) {
            let level = state.level_string(credential_id);
            self.audit.append(
                &self
                    .audit_entry(
                        AuditEvent::Retrieve,
                        credential_id,
                        user_id,
                        &level,
                        AuditOutcome::RateLimited,
                    )
                    .with_details(serde_json::json!({
                        "max_attempts": self.config.rate_limit.max_attempts,
                        "window_secs": self.config.rate_limit.window_secs,
                    })),
            )?;
            return Err(CredentialError::SecurityViolation(format!(
                "rate limit exceeded for credential '{credential_id}'"
            )));
        }

        let (plaintext, level) =
            self.read_value_locked(&state, credential_id, user_id, AuditEvent::Retrieve)?;
        let value = match std::str::from_utf8(&plaintext) {
            Ok(s) => Zeroizing::new(s.to_string()),
            Err(_) => {
                self.audit.append(
                    &self
                        .audit_entry(
                            AuditEvent::Retrieve,
                            credential_id,
                            user_id,
                            level.as_str(),
                            AuditOutcome::Failed,
                        )
                        .with_details(serde_json::json!({"reason": "payload is not valid utf-8"})),
                )?;
                return Err(CredentialError::SecurityViolation(
                    "credential payload is not valid utf-8".to_string(),
                ));
            }
        };
        drop(plaintext);

        let now = Utc::now();
        let (access_count, needs_persist) =
            if let Some(m) = state.ephemeral.get_mut(credential_id) {
                m.record_access(now);
                (m.access_count, false)
            } else if let Some(m) = state.persistent.get_mut(credential_id) {
                m.record_access(now);
                (m.access_count, true)
            } else {
                (0, false)
            };
        if needs_persist {
            state.persistent.persist()?;
        }

        self.audit.append(
            &self
                .audit_entry(
                    AuditEvent::Retrieve,
                    credential_id,
                    user_id,
                    level.as_str(),
                    AuditOutcome::Success,
                )
                .with_details(serde_json::json!({
                    "access_count": access_count,
                    "correlation_hash": correlation_hash(value.as_str()),
                })),
        )?;
        debug!(credential_id = %credential_id, "credential retrieved");
        Ok(value)
    }

    /// Remove a credential. Persistent ciphertext is overwritten with random
    /// bytes before unlinking; the id's rate-limit history is cleared.
    pub fn delete(&self, credential_id: &str, user_id: Option<&str>) -> CredentialResult<()> {
        validate_id(credential_id)?;
        let mut state = self.state.lock();

        let Some(level) = state.metadata(credential_id).map(|m| m.security_level) else {
            self.audit.append(&self.audit_entry(
                AuditEvent::Delete,
                credential_id,
                user_id,
                "unknown",
                AuditOutcome::NotFound,
            ))?;
            return Err(CredentialError::NotFound(credential_id.to_string()));
        };

        let backend = state.backend(level);
        backend.delete(credential_id)?;
        backend.persist()?;
        state.limiter.reset(credential_id);

        self.audit.append(
            &self
                .audit_entry(
                    AuditEvent::Delete,
                    credential_id,
                    user_id,
                    level.as_str(),
                    AuditOutcome::Success,
                )
                .with_details(serde_json::json!({"shredded": level.is_persistent()})),
        )?;
        info!(credential_id = %credential_id, "credential deleted");
        Ok(())
    }

    /// Replace a credential's value in place. The old value is backed up
    /// under `<id>_backup_<unix_ts>` with a 30-day expiry and a `backup_of`
    /// tag; the primary keeps its type, level, expiry, and tags, and its
    /// rotation flag is cleared. Returns the backup id.
    pub fn rotate(
        &self,
        credential_id: &str,
        new_value: &str,
        user_id: Option<&str>,
    ) -> CredentialResult<String> {
        validate_id(credential_id)?;
        if new_value.is_empty() {
            return Err(CredentialError::InvalidInput(
                "replacement value is empty".to_string(),
            ));
        }

        let mut state = self.state.lock();

        if new_value.len() > MAX_CREDENTIAL_BYTES {
            self.audit.append(
                &self
                    .audit_entry(
                        AuditEvent::Rotate,
                        credential_id,
                        user_id,
                        &state.level_string(credential_id),
                        AuditOutcome::Failed,
                    )
                    .with_details(serde_json::json!({
                        "reason": "oversized",
                        "bytes": new_value.len(),
                        "limit": MAX_CREDENTIAL_BYTES,
                    })),
            )?;
            return Err(CredentialError::SecurityViolation(format!(
                "replacement value is {} bytes, limit is {MAX_CREDENTIAL_BYTES}",
                new_value.len()
            )));
        }

        // Internal read: expiry is enforced, the rate limiter is not.
        let (old_value, _) =
            self.read_value_locked(&state, credential_id, user_id, AuditEvent::Rotate)?;
        let Some(original) = state.metadata(credential_id).cloned() else {
            return Err(CredentialError::NotFound(credential_id.to_string()));
        };
        let level = original.security_level;

        let now = Utc::now();
        let mut ts = now.timestamp();
        let backup_id = loop {
            let candidate = format!("{credential_id}_backup_{ts}");
            if !state.contains(&candidate) {
                break candidate;
            }
            ts += 1;
        };

        let mut backup = CredentialMetadata::new(
            backup_id.as_str(),
            original.credential_type,
            level,
            self.config.environment.as_str(),
        );
        backup.expires_at = Some(now + chrono::Duration::days(BACKUP_RETENTION_DAYS));
        backup.tags = original.tags.clone();
        backup
            .tags
            .insert("backup_of".to_string(), credential_id.to_string());

        let sealed_backup = self.cipher.seal(&old_value, level)?;
        drop(old_value);
        let sealed_new = self.cipher.seal(new_value.as_bytes(), level)?;

        let report = talon_entropy::assess(new_value);
        if level.is_persistent() && report.verdict == StrengthVerdict::Weak {
            warn!(
                credential_id = %credential_id,
                score = report.score,
                "rotating in a weak credential"
            );
        }

        let mut replacement = CredentialMetadata::new(
            credential_id,
            original.credential_type,
            level,
            self.config.environment.as_str(),
        );
        replacement.expires_at = original.expires_at;
        replacement.tags = original.tags;

        let backend = state.backend(level);
        backend.put(backup, &sealed_backup)?;
        // The replacement overwrites the primary in place: put renames the
        // new ciphertext over the old file, so no point in the rotation
        // leaves metadata naming a credential without its envelope.
        backend.put(replacement, &sealed_new)?;
        backend.persist()?;

        self.audit.append(
            &self
                .audit_entry(
                    AuditEvent::Rotate,
                    credential_id,
                    user_id,
                    level.as_str(),
                    AuditOutcome::Success,
                )
                .with_details(serde_json::json!({
                    "backup_id": backup_id,
                    "correlation_hash": correlation_hash(new_value),
                })),
        )?;
        info!(credential_id = %credential_id, backup_id = %backup_id, "credential rotated");
        Ok(backup_id)
    }

    // ─── Lifecycle & inventory ───────────────────────────────────────────

    /// Metadata for credentials matching the filters, sorted by id. Expired
    /// entries are excluded unless requested.
    pub fn list(
        &self,
        credential_type: Option<CredentialType>,
        security_level: Option<SecurityLevel>,
        include_expired: bool,
    ) -> Vec<CredentialMetadata> {
        let state = self.state.lock();
        let now = Utc::now();
        let mut out: Vec<CredentialMetadata> = state
            .ephemeral
            .list()
            .into_iter()
            .chain(state.persistent.list())
            .filter(|m| credential_type.is_none_or(|t| m.credential_type == t))
            .filter(|m| security_level.is_none_or(|l| m.security_level == l))
            .filter(|m| include_expired || !m.is_expired(now))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.credential_id.cmp(&b.credential_id));
        out
    }

    /// Flag a credential as due for rotation.
    pub fn mark_for_rotation(
        &self,
        credential_id: &str,
        user_id: Option<&str>,
    ) -> CredentialResult<()> {
        validate_id(credential_id)?;
        let mut state = self.state.lock();

        let level = if let Some(m) = state.ephemeral.get_mut(credential_id) {
            m.rotation_required = true;
            m.security_level
        } else if let Some(m) = state.persistent.get_mut(credential_id) {
            m.rotation_required = true;
            m.security_level
        } else {
            self.audit.append(&self.audit_entry(
                AuditEvent::MarkForRotation,
                credential_id,
                user_id,
                "unknown",
                AuditOutcome::NotFound,
            ))?;
            return Err(CredentialError::NotFound(credential_id.to_string()));
        };
        if level.is_persistent() {
            state.persistent.persist()?;
        }

        self.audit.append(&self.audit_entry(
            AuditEvent::MarkForRotation,
            credential_id,
            user_id,
            level.as_str(),
            AuditOutcome::Success,
        ))?;
        info!(credential_id = %credential_id, "credential flagged for rotation");
        Ok(())
    }

    /// Delete every expired credential in both backends and return the
    /// count. The only operation that reaps expired ephemeral entries
    /// proactively; otherwise expiry is checked lazily on access.
    pub fn cleanup_expired(&self) -> CredentialResult<usize> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let expired: Vec<(String, SecurityLevel)> = state
            .ephemeral
            .list()
            .into_iter()
            .chain(state.persistent.list())
            .filter(|m| m.is_expired(now))
            .map(|m| (m.credential_id.clone(), m.security_level))
            .collect();

        let mut persistent_touched = false;
        for (id, level) in &expired {
            state.backend(*level).delete(id)?;
            state.limiter.reset(id);
            persistent_touched |= level.is_persistent();
            self.audit.append(
                &self
                    .audit_entry(
                        AuditEvent::Cleanup,
                        id,
                        None,
                        level.as_str(),
                        AuditOutcome::Success,
                    )
                    .with_details(serde_json::json!({"reason": "expired"})),
            )?;
        }
        if persistent_touched {
            state.persistent.persist()?;
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "expired credentials cleaned up");
        }
        Ok(expired.len())
    }

    /// Scoped access: the decrypted value is handed to `f` and its in-memory
    /// copy is zeroed on every exit path, including panics. Full retrieve
    /// semantics apply (rate limit, expiry, audit).
    pub fn with_credential<T>(
        &self,
        credential_id: &str,
        user_id: Option<&str>,
        f: impl FnOnce(&str) -> T,
    ) -> CredentialResult<T> {
        let value = self.retrieve(credential_id, user_id)?;
        Ok(f(value.as_str()))
    }

    // ─── Health & statistics ─────────────────────────────────────────────

    /// Probe storage and audit writability and count lifecycle debt.
    /// Failures are reported in the result, never raised.
    pub fn health_check(&self) -> HealthCheckResult {
        let checked_at = Utc::now();
        let mut status = HealthStatus::Healthy;
        let mut issues = Vec::new();

        if let Err(e) = self.storage_probe() {
            status = HealthStatus::Error;
            issues.push(format!("storage probe failed: {e}"));
        }

        let probe_entry = self
            .audit_entry(
                AuditEvent::HealthCheck,
                "health_probe",
                None,
                "none",
                AuditOutcome::Success,
            )
            .with_details(serde_json::json!({"probe": true}));
        if let Err(e) = self.audit.append(&probe_entry) {
            status = status.max(HealthStatus::Degraded);
            issues.push(format!("audit write failed: {e}"));
        }

        let (total, rotation_due, expired) = {
            let state = self.state.lock();
            let now = Utc::now();
            let mut total = 0;
            let mut rotation_due = 0;
            let mut expired = 0;
            for m in state
                .ephemeral
                .list()
                .into_iter()
                .chain(state.persistent.list())
            {
                total += 1;
                if m.rotation_required {
                    rotation_due += 1;
                }
                if m.is_expired(now) {
                    expired += 1;
                }
            }
            (total, rotation_due, expired)
        };
        if rotation_due > 0 {
            status = status.max(HealthStatus::Warning);
            issues.push(format!("{rotation_due} credential(s) due for rotation"));
        }
        if expired > 0 {
            status = status.max(HealthStatus::Warning);
            issues.push(format!("{expired} credential(s) expired"));
        }

        HealthCheckResult {
            status,
            issues,
            total_credentials: total,
            rotation_due,
            expired,
            checked_at,
        }
    }

    /// Inventory counts across both backends.
    pub fn stats(&self) -> VaultStats {
        let state = self.state.lock();
        let now = Utc::now();
        let mut stats = VaultStats::default();
        for m in state
            .ephemeral
            .list()
            .into_iter()
            .chain(state.persistent.list())
        {
            stats.total += 1;
            if m.security_level.is_persistent() {
                stats.persistent += 1;
            } else {
                stats.ephemeral += 1;
            }
            if m.is_expired(now) {
                stats.expired += 1;
            }
            if m.rotation_required {
                stats.rotation_due += 1;
            }
            *stats
                .by_level
                .entry(m.security_level.to_string())
                .or_default() += 1;
            *stats
                .by_type
                .entry(m.credential_type.to_string())
                .or_default() += 1;
        }
        stats
    }

    // ─── Internals ───────────────────────────────────────────────────────

    /// Look up, expiry-check, and decrypt a credential under the held lock.
    /// Audit entries carry `event` so rotation reads are distinguishable
    /// from retrievals.
    fn read_value_locked(
        &self,
        state: &VaultState,
        credential_id: &str,
        user_id: Option<&str>,
        event: AuditEvent,
    ) -> CredentialResult<(Zeroizing<Vec<u8>>, SecurityLevel)> {
        let Some((level, expired)) = state
            .metadata(credential_id)
            .map(|m| (m.security_level, m.is_expired(Utc::now())))
        else {
            self.audit.append(&self.audit_entry(
                event,
                credential_id,
                user_id,
                "unknown",
                AuditOutcome::NotFound,
            ))?;
            return Err(CredentialError::NotFound(credential_id.to_string()));
        };

        if expired {
            self.audit.append(&self.audit_entry(
                event,
                credential_id,
                user_id,
                level.as_str(),
                AuditOutcome::Expired,
            ))?;
            return Err(CredentialError::Expired(credential_id.to_string()));
        }

        let sealed = if state.ephemeral.contains(credential_id) {
            state.ephemeral.sealed(credential_id)?
        } else {
            state.persistent.sealed(credential_id)?
        };

        match self.cipher.open(&sealed, level) {
            Ok(plaintext) => Ok((plaintext, level)),
            Err(e) => {
                self.audit.append(
                    &self
                        .audit_entry(
                            event,
                            credential_id,
                            user_id,
                            level.as_str(),
                            AuditOutcome::Failed,
                        )
                        .with_details(serde_json::json!({"reason": e.to_string()})),
                )?;
                Err(CredentialError::SecurityViolation(e.to_string()))
            }
        }
    }

    fn audit_entry(
        &self,
        event: AuditEvent,
        credential_id: &str,
        user_id: Option<&str>,
        security_level: &str,
        outcome: AuditOutcome,
    ) -> AuditEntry {
        AuditEntry::new(
            event,
            credential_id,
            user_id,
            &self.config.environment,
            security_level,
            outcome,
        )
    }

    /// Round-trip a uniquely named file through the environment root.
    fn storage_probe(&self) -> std::io::Result<()> {
        let path = self.env_root.join(format!(".health_probe_{}", Uuid::new_v4()));
        let mut token = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut token);
        let payload = hex::encode(token);
        fs::write(&path, &payload)?;
        let back = fs::read_to_string(&path)?;
        fs::remove_file(&path)?;
        if back != payload {
            return Err(std::io::Error::other("probe readback mismatch"));
        }
        Ok(())
    }
}

// ─── Construction helpers ────────────────────────────────────────────────────

fn resolve_master_key(config: &VaultConfig) -> CredentialResult<String> {
    if let Some(key) = config.master_key.as_deref() {
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }
    match std::env::var(&config.master_key_var) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ if config.environment == DEV_ENVIRONMENT => {
            let key = DEV_MASTER_KEY.get_or_init(|| {
                warn!("no master key supplied, generated an ephemeral development key");
                MasterKey::generate_hex()
            });
            Ok(key.clone())
        }
        _ => Err(CredentialError::Config(format!(
            "master key environment variable '{}' is not set",
            config.master_key_var
        ))),
    }
}

fn validate_environment(environment: &str) -> CredentialResult<()> {
    if environment.is_empty() {
        return Err(CredentialError::Config(
            "environment name is empty".to_string(),
        ));
    }
    if !environment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(CredentialError::Config(format!(
            "environment name '{environment}' contains unsupported characters"
        )));
    }
    Ok(())
}

/// Ids become file names and audit-line fields, so the charset is strict.
fn validate_id(credential_id: &str) -> CredentialResult<()> {
    if credential_id.is_empty() {
        return Err(CredentialError::InvalidInput(
            "credential id is empty".to_string(),
        ));
    }
    if credential_id.len() > MAX_ID_LEN {
        return Err(CredentialError::InvalidInput(format!(
            "credential id exceeds {MAX_ID_LEN} characters"
        )));
    }
    if !credential_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    {
        return Err(CredentialError::InvalidInput(format!(
            "credential id '{credential_id}' contains unsupported characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use talon_audit::AuditFilter;

    fn test_vault_env(dir: &Path, environment: &str) -> CredentialVault {
        let mut config = VaultConfig::new(dir, environment);
        config.master_key = Some("unit-test-master-key".to_string());
        config.kdf_iterations = 1000;
        CredentialVault::new(config).expect("vault")
    }

    fn test_vault(dir: &Path) -> CredentialVault {
        test_vault_env(dir, "testenv")
    }

    fn store_simple(vault: &CredentialVault, id: &str, value: &str, level: SecurityLevel) {
        vault
            .store(id, value, CredentialType::ApiKey, level, None, HashMap::new(), None)
            .expect("store");
    }

    #[test]
    fn test_store_and_retrieve_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        store_simple(&vault, "db_password", "T0p-Secret-Val1", SecurityLevel::High);
        assert!(dir
            .path()
            .join("testenv")
            .join("encrypted")
            .join("db_password.enc")
            .exists());

        let value = vault.retrieve("db_password", Some("alice")).expect("retrieve");
        assert_eq!(value.as_str(), "T0p-Secret-Val1");

        let listed = vault.list(None, None, false);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].access_count, 1);
        assert!(listed[0].last_accessed.is_some());
    }

    #[test]
    fn test_duplicate_store_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        store_simple(&vault, "api", "first-value-9Q!", SecurityLevel::Standard);
        let err = vault
            .store(
                "api",
                "second",
                CredentialType::ApiKey,
                SecurityLevel::Standard,
                None,
                HashMap::new(),
                None,
            )
            .expect_err("duplicate must fail");
        assert!(matches!(err, CredentialError::SecurityViolation(_)));

        // Original value intact.
        let value = vault.retrieve("api", None).expect("retrieve");
        assert_eq!(value.as_str(), "first-value-9Q!");
    }

    #[test]
    fn test_validation_rejected_before_audit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        let empty_id = vault.store(
            "",
            "v",
            CredentialType::ApiKey,
            SecurityLevel::Standard,
            None,
            HashMap::new(),
            None,
        );
        assert!(matches!(empty_id, Err(CredentialError::InvalidInput(_))));

        let empty_value = vault.store(
            "k",
            "",
            CredentialType::ApiKey,
            SecurityLevel::Standard,
            None,
            HashMap::new(),
            None,
        );
        assert!(matches!(empty_value, Err(CredentialError::InvalidInput(_))));

        let bad_chars = vault.store(
            "../escape",
            "v",
            CredentialType::ApiKey,
            SecurityLevel::Standard,
            None,
            HashMap::new(),
            None,
        );
        assert!(matches!(bad_chars, Err(CredentialError::InvalidInput(_))));

        // None of the rejects reached the audit log.
        let entries = vault.audit_log().query(&AuditFilter::default()).expect("query");
        assert!(entries.is_empty());
    }

    #[test]
    fn test_oversized_value_is_violation_and_audited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        let big = "x".repeat(MAX_CREDENTIAL_BYTES + 1);
        let err = vault
            .store(
                "big",
                &big,
                CredentialType::ApiKey,
                SecurityLevel::Standard,
                None,
                HashMap::new(),
                None,
            )
            .expect_err("oversized must fail");
        assert!(matches!(err, CredentialError::SecurityViolation(_)));

        let entries = vault.audit_log().query(&AuditFilter::default()).expect("query");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, talon_audit::AuditOutcome::Failed);
        assert_eq!(entries[0].details["reason"], "oversized");

        // Limit boundary itself is accepted.
        let exact = "y".repeat(MAX_CREDENTIAL_BYTES);
        store_simple(&vault, "exact", &exact, SecurityLevel::Standard);
    }

    #[test]
    fn test_ephemeral_never_touches_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        store_simple(&vault, "session_token", "tmp-secret-Zz9!", SecurityLevel::Ephemeral);
        let enc_dir = dir.path().join("testenv").join("encrypted");
        assert_eq!(fs::read_dir(&enc_dir).expect("read_dir").count(), 0);

        let value = vault.retrieve("session_token", None).expect("retrieve");
        assert_eq!(value.as_str(), "tmp-secret-Zz9!");

        // A fresh instance over the same root has no trace of it.
        drop(vault);
        let reopened = test_vault(dir.path());
        let err = reopened.retrieve("session_token", None).expect_err("gone");
        assert!(matches!(err, CredentialError::NotFound(_)));
    }

    #[test]
    fn test_retrieve_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        let err = vault.retrieve("ghost", None).expect_err("missing");
        assert!(matches!(err, CredentialError::NotFound(_)));

        let entries = vault.audit_log().query(&AuditFilter::default()).expect("query");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, talon_audit::AuditOutcome::NotFound);
        assert_eq!(entries[0].security_level, "unknown");
    }

    #[test]
    fn test_expiry_blocks_retrieve_and_cleanup_reaps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        let past = Utc::now() - chrono::Duration::hours(1);
        vault
            .store(
                "stale",
                "old-value-Pp3#",
                CredentialType::DatabasePassword,
                SecurityLevel::Standard,
                Some(past),
                HashMap::new(),
                None,
            )
            .expect("store");
        store_simple(&vault, "fresh", "live-value-Qq4$", SecurityLevel::Standard);

        let err = vault.retrieve("stale", None).expect_err("expired");
        assert!(matches!(err, CredentialError::Expired(_)));

        assert_eq!(vault.list(None, None, false).len(), 1);
        assert_eq!(vault.list(None, None, true).len(), 2);

        assert_eq!(vault.cleanup_expired().expect("cleanup"), 1);
        assert!(!dir
            .path()
            .join("testenv")
            .join("encrypted")
            .join("stale.enc")
            .exists());
        let err = vault.retrieve("stale", None).expect_err("reaped");
        assert!(matches!(err, CredentialError::NotFound(_)));
        assert_eq!(vault.cleanup_expired().expect("cleanup"), 0);
    }

    #[test]
    fn test_rotation_backs_up_and_replaces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        let mut tags = HashMap::new();
        tags.insert("team".to_string(), "payments".to_string());
        vault
            .store(
                "api_key",
                "old-key-Aa1!",
                CredentialType::ApiKey,
                SecurityLevel::High,
                None,
                tags,
                Some("ops"),
            )
            .expect("store");
        vault.mark_for_rotation("api_key", Some("ops")).expect("mark");

        let backup_id = vault.rotate("api_key", "new-key-Bb2@", Some("ops")).expect("rotate");
        assert!(backup_id.starts_with("api_key_backup_"));

        let value = vault.retrieve("api_key", None).expect("retrieve");
        assert_eq!(value.as_str(), "new-key-Bb2@");
        let backup_value = vault.retrieve(&backup_id, None).expect("retrieve backup");
        assert_eq!(backup_value.as_str(), "old-key-Aa1!");

        let listed = vault.list(None, None, true);
        let primary = listed.iter().find(|m| m.credential_id == "api_key").expect("primary");
        assert!(!primary.rotation_required);
        assert_eq!(primary.tags["team"], "payments");
        assert_eq!(primary.security_level, SecurityLevel::High);

        let backup = listed.iter().find(|m| m.credential_id == backup_id).expect("backup");
        assert_eq!(backup.tags["backup_of"], "api_key");
        assert_eq!(backup.tags["team"], "payments");
        let ttl = backup.expires_at.expect("backup expiry") - Utc::now();
        assert!(ttl > chrono::Duration::days(29) && ttl <= chrono::Duration::days(30));
    }

    #[test]
    fn test_rotate_overwrites_primary_envelope_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());
        store_simple(&vault, "svc_token", "before-Mm4$", SecurityLevel::Standard);

        let enc_dir = dir.path().join("testenv").join("encrypted");
        let primary = enc_dir.join("svc_token.enc");
        let before = fs::read(&primary).expect("read envelope");

        let backup_id = vault.rotate("svc_token", "after-Nn5%", None).expect("rotate");

        // The primary ciphertext file was replaced, never unlinked, and the
        // rotation left no temp files behind.
        assert!(primary.exists());
        assert_ne!(fs::read(&primary).expect("read envelope"), before);
        assert!(enc_dir.join(format!("{backup_id}.enc")).exists());
        assert!(fs::read_dir(&enc_dir)
            .expect("read_dir")
            .all(|e| !e.expect("entry").file_name().to_string_lossy().ends_with(".tmp")));

        assert_eq!(vault.retrieve("svc_token", None).expect("retrieve").as_str(), "after-Nn5%");
    }

    #[test]
    fn test_mark_for_rotation_missing_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());
        let err = vault.mark_for_rotation("ghost", None).expect_err("missing");
        assert!(matches!(err, CredentialError::NotFound(_)));
    }

    #[test]
    fn test_rate_limit_rejects_then_audits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = VaultConfig::new(dir.path(), "testenv");
        config.master_key = Some("unit-test-master-key".to_string());
        config.kdf_iterations = 1000;
        config.rate_limit = RateLimitConfig {
            max_attempts: 2,
            window_secs: 3600,
        };
        let vault = CredentialVault::new(config).expect("vault");

        store_simple(&vault, "hot", "value-Cc3#", SecurityLevel::Standard);
        vault.retrieve("hot", None).expect("first");
        vault.retrieve("hot", None).expect("second");
        let err = vault.retrieve("hot", None).expect_err("limited");
        assert!(matches!(err, CredentialError::SecurityViolation(_)));

        let limited = vault
            .audit_log()
            .query(&AuditFilter {
                event: Some(AuditEvent::Retrieve),
                ..Default::default()
            })
            .expect("query");
        assert_eq!(
            limited
                .iter()
                .filter(|e| e.outcome == talon_audit::AuditOutcome::RateLimited)
                .count(),
            1
        );

        // Deleting the credential clears its window.
        vault.delete("hot", None).expect("delete");
        store_simple(&vault, "hot", "value-Dd4$", SecurityLevel::Standard);
        vault.retrieve("hot", None).expect("fresh window");
    }

    #[test]
    fn test_with_credential_scopes_access() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());
        store_simple(&vault, "scoped", "abcd1234wxyz", SecurityLevel::Standard);

        let len = vault
            .with_credential("scoped", None, |value| value.len())
            .expect("with_credential");
        assert_eq!(len, 12);

        let err = vault
            .with_credential("ghost", None, |_| ())
            .expect_err("missing");
        assert!(matches!(err, CredentialError::NotFound(_)));
    }

    #[test]
    fn test_health_check_reflects_lifecycle_debt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        let healthy = vault.health_check();
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert!(healthy.issues.is_empty());

        store_simple(&vault, "aging", "value-Ee5%", SecurityLevel::Standard);
        vault.mark_for_rotation("aging", None).expect("mark");

        let warned = vault.health_check();
        assert_eq!(warned.status, HealthStatus::Warning);
        assert_eq!(warned.rotation_due, 1);
        assert!(warned.issues.iter().any(|i| i.contains("rotation")));
    }

    #[test]
    fn test_stats_counts_by_level_and_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());

        store_simple(&vault, "p1", "value-Ff6^", SecurityLevel::Standard);
        store_simple(&vault, "p2", "value-Gg7&", SecurityLevel::Critical);
        store_simple(&vault, "e1", "value-Hh8*", SecurityLevel::Ephemeral);

        let stats = vault.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.persistent, 2);
        assert_eq!(stats.ephemeral, 1);
        assert_eq!(stats.by_level["standard"], 1);
        assert_eq!(stats.by_level["critical"], 1);
        assert_eq!(stats.by_type["api_key"], 3);
    }

    #[test]
    fn test_missing_master_key_is_fatal_outside_development() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = VaultConfig::new(dir.path(), "production");
        config.master_key_var = "TALON_TEST_UNSET_VAR_XYZ".to_string();
        let err = CredentialVault::new(config).expect_err("must fail");
        assert!(matches!(err, CredentialError::Config(_)));
    }

    #[test]
    fn test_development_generates_process_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = VaultConfig::new(dir.path(), DEV_ENVIRONMENT);
        config.master_key_var = "TALON_TEST_UNSET_VAR_XYZ".to_string();
        config.kdf_iterations = 1000;
        let vault = CredentialVault::new(config).expect("dev vault");

        store_simple(&vault, "dev_secret", "value-Ii9(", SecurityLevel::Standard);
        drop(vault);

        // Same process, same generated key: a reopened dev vault still decrypts.
        let mut config = VaultConfig::new(dir.path(), DEV_ENVIRONMENT);
        config.master_key_var = "TALON_TEST_UNSET_VAR_XYZ".to_string();
        config.kdf_iterations = 1000;
        let reopened = CredentialVault::new(config).expect("dev vault");
        let value = reopened.retrieve("dev_secret", None).expect("retrieve");
        assert_eq!(value.as_str(), "value-Ii9(");
    }

    #[test]
    fn test_debug_redacts_vault_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = test_vault(dir.path());
        store_simple(&vault, "hidden", "never-in-debug-Nn5%", SecurityLevel::Standard);

        let debug_str = format!("{vault:?}");
        assert!(debug_str.contains("testenv"));
        assert!(!debug_str.contains("unit-test-master-key"));
        assert!(!debug_str.contains("never-in-debug"));
    }

    #[test]
    fn test_invalid_environment_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = VaultConfig::new(dir.path(), "bad/env");
        config.master_key = Some("k".to_string());
        let err = CredentialVault::new(config).expect_err("must fail");
        assert!(matches!(err, CredentialError::Config(_)));
    }
}
