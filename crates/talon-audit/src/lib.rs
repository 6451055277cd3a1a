//! Pipe-delimited monthly audit trail for TalonVault.
//!
//! Every credential operation is logged before its outcome is returned to the
//! caller. Entries land in `<env_root>/audit/credential_audit_<YYYYMM>.log`,
//! one line each:
//!
//! `timestamp|event|credential_id|user_id|environment|security_level|outcome|details_json`
//!
//! The JSON details field is always last, so pipes inside it never break
//! parsing.

#![forbid(unsafe_code)]

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use talon_persist::{restrict_file, secure_dir};
use thiserror::Error;
use tracing::{debug, warn};

const AUDIT_FILE_PREFIX: &str = "credential_audit_";
const AUDIT_FILE_SUFFIX: &str = ".log";

/// Fields per audit line.
const FIELD_COUNT: usize = 8;

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuditError {
    /// Line did not match the pipe-delimited audit format.
    #[error("malformed audit line: {0}")]
    Malformed(String),
    /// Underlying filesystem failure.
    #[error("audit storage error: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Store,
    Retrieve,
    Delete,
    Rotate,
    MarkForRotation,
    Cleanup,
    HealthCheck,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Retrieve => "retrieve",
            Self::Delete => "delete",
            Self::Rotate => "rotate",
            Self::MarkForRotation => "mark_for_rotation",
            Self::Cleanup => "cleanup",
            Self::HealthCheck => "health_check",
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditEvent {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "store" => Ok(Self::Store),
            "retrieve" => Ok(Self::Retrieve),
            "delete" => Ok(Self::Delete),
            "rotate" => Ok(Self::Rotate),
            "mark_for_rotation" => Ok(Self::MarkForRotation),
            "cleanup" => Ok(Self::Cleanup),
            "health_check" => Ok(Self::HealthCheck),
            other => Err(AuditError::Malformed(format!("unknown event '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failed,
    RateLimited,
    NotFound,
    Expired,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditOutcome {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "rate_limited" => Ok(Self::RateLimited),
            "not_found" => Ok(Self::NotFound),
            "expired" => Ok(Self::Expired),
            other => Err(AuditError::Malformed(format!("unknown outcome '{other}'"))),
        }
    }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// One audit line, parsed or about to be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub credential_id: String,
    /// `"system"` when no caller identity was supplied.
    pub user_id: String,
    pub environment: String,
    pub security_level: String,
    pub outcome: AuditOutcome,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        event: AuditEvent,
        credential_id: &str,
        user_id: Option<&str>,
        environment: &str,
        security_level: &str,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            // Truncated to the wire format's microsecond precision so a
            // written line parses back to an identical timestamp.
            timestamp: Utc::now().trunc_subsecs(6),
            event,
            credential_id: credential_id.to_string(),
            user_id: user_id.unwrap_or("system").to_string(),
            environment: environment.to_string(),
            security_level: security_level.to_string(),
            outcome,
            details: serde_json::json!({}),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Render as one pipe-delimited log line (no trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.event,
            self.credential_id,
            self.user_id,
            self.environment,
            self.security_level,
            self.outcome,
            self.details,
        )
    }

    /// Parse one log line. The details field is split last so embedded pipes
    /// inside the JSON survive.
    pub fn parse(line: &str) -> Result<Self, AuditError> {
        let parts: Vec<&str> = line.splitn(FIELD_COUNT, '|').collect();
        if parts.len() != FIELD_COUNT {
            return Err(AuditError::Malformed(format!(
                "expected {FIELD_COUNT} fields, got {}",
                parts.len()
            )));
        }
        let timestamp = DateTime::parse_from_rfc3339(parts[0])
            .map_err(|e| AuditError::Malformed(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let event = parts[1].parse()?;
        let outcome = parts[6].parse()?;
        let details = serde_json::from_str(parts[7])
            .map_err(|e| AuditError::Malformed(format!("bad details json: {e}")))?;
        Ok(Self {
            timestamp,
            event,
            credential_id: parts[2].to_string(),
            user_id: parts[3].to_string(),
            environment: parts[4].to_string(),
            security_level: parts[5].to_string(),
            outcome,
            details,
        })
    }
}

/// Short stable fingerprint of a secret value. First 16 hex chars of SHA-256,
/// enough to correlate a value across store and rotate entries without
/// exposing it.
pub fn correlation_hash(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// Time-range and field filters for [`AuditLog::query`]. `None` fields match
/// everything; `from` and `to` are inclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub credential_id: Option<String>,
    pub event: Option<AuditEvent>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if self.from.is_some_and(|f| entry.timestamp < f) {
            return false;
        }
        if self.to.is_some_and(|t| entry.timestamp > t) {
            return false;
        }
        if self
            .credential_id
            .as_deref()
            .is_some_and(|id| entry.credential_id != id)
        {
            return false;
        }
        if self.event.is_some_and(|e| entry.event != e) {
            return false;
        }
        true
    }
}

/// Append-only audit log over one environment's `audit/` directory.
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one entry to the month file named by its timestamp.
    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        secure_dir(&self.dir)?;
        let path = self.dir.join(month_file_name(&entry.timestamp));
        let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
        restrict_file(&path)?;
        file.write_all(entry.to_line().as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        debug!(
            event = %entry.event,
            credential_id = %entry.credential_id,
            outcome = %entry.outcome,
            "audit entry appended"
        );
        Ok(())
    }

    /// Return matching entries across all month files, oldest first.
    ///
    /// Month files wholly outside the filter's time range are skipped without
    /// being read. Malformed lines are logged and skipped.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let mut out = Vec::new();
        if !self.dir.exists() {
            return Ok(out);
        }
        for name in self.log_files()? {
            if let Some((start, end)) = month_bounds(&name) {
                if filter.from.is_some_and(|f| end <= f) {
                    continue;
                }
                if filter.to.is_some_and(|t| start > t) {
                    continue;
                }
            }
            let text = fs::read_to_string(self.dir.join(&name))?;
            for line in text.lines() {
                let entry = match AuditEntry::parse(line) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(file = %name, error = %e, "skipping malformed audit line");
                        continue;
                    }
                };
                if filter.matches(&entry) {
                    out.push(entry);
                }
            }
        }
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }

    /// Scan every month file and report integrity problems without failing.
    pub fn verify(&self) -> Result<AuditVerification, AuditError> {
        let mut report = AuditVerification::default();
        if !self.dir.exists() {
            return Ok(report);
        }
        let mut last_ts: Option<DateTime<Utc>> = None;
        for name in self.log_files()? {
            report.files += 1;
            let text = fs::read_to_string(self.dir.join(&name))?;
            for (idx, line) in text.lines().enumerate() {
                match AuditEntry::parse(line) {
                    Ok(entry) => {
                        report.entries += 1;
                        if last_ts.is_some_and(|t| entry.timestamp < t) {
                            report.out_of_order += 1;
                            warn!(file = %name, line = idx + 1, "audit entry out of order");
                        }
                        last_ts = Some(entry.timestamp);
                    }
                    Err(e) => {
                        report.malformed += 1;
                        warn!(file = %name, line = idx + 1, error = %e, "malformed audit line");
                    }
                }
            }
        }
        Ok(report)
    }

    /// Month file names under the audit dir, ascending.
    fn log_files(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for dent in fs::read_dir(&self.dir)? {
            let name = dent?.file_name().to_string_lossy().into_owned();
            if name.starts_with(AUDIT_FILE_PREFIX) && name.ends_with(AUDIT_FILE_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

// ─── Verification ────────────────────────────────────────────────────────────

/// Result of [`AuditLog::verify`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditVerification {
    pub files: usize,
    pub entries: usize,
    pub malformed: usize,
    pub out_of_order: usize,
}

impl AuditVerification {
    pub fn is_clean(&self) -> bool {
        self.malformed == 0 && self.out_of_order == 0
    }
}

fn month_file_name(ts: &DateTime<Utc>) -> String {
    format!("{AUDIT_FILE_PREFIX}{}{AUDIT_FILE_SUFFIX}", ts.format("%Y%m"))
}

/// `[start, end)` of the month a file name covers, or `None` if the name
/// does not carry a parseable `YYYYMM`.
fn month_bounds(name: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let stem = name
        .strip_prefix(AUDIT_FILE_PREFIX)?
        .strip_suffix(AUDIT_FILE_SUFFIX)?;
    if stem.len() != 6 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = stem[..4].parse().ok()?;
    let month: u32 = stem[4..].parse().ok()?;
    let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()?;
    Some((start, end))
}
