//! Filesystem persistence primitives for TalonVault.
//!
//! Provides [`JsonDocStore`], a single-document JSON key-value store with
//! atomic rewrites, plus the secure file helpers the vault builds on:
//! owner-only permission enforcement, atomic byte writes, and
//! overwrite-before-unlink deletion for ciphertext files.
//!
//! Atomicity: every write goes to a temp file in the same directory, is
//! fsynced, then renamed over the target. A partially written document is
//! never observable, even across a crash.

#![forbid(unsafe_code)]

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ─── Permission helpers ──────────────────────────────────────────────────────

/// Restrict a file to owner read/write (0600). No-op off Unix.
pub fn restrict_file(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Restrict a directory to owner read/write/execute (0700). No-op off Unix.
pub fn restrict_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o700);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Create a directory (and parents) and restrict it to owner-only access.
pub fn secure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)?;
    restrict_dir(path)
}

// ─── Atomic writes ───────────────────────────────────────────────────────────

/// Atomically write `bytes` to `path` with owner-only permissions.
///
/// Temp file in the same directory, permissions restricted before content is
/// written, fsync, rename, then a best-effort fsync of the directory.
pub fn write_secure(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("path has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("path has no file name"))?
        .to_string_lossy();
    let tmp = parent.join(format!("{file_name}.tmp"));

    {
        let mut file = File::create(&tmp)?;
        restrict_file(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })?;

    #[cfg(unix)]
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Overwrite a file with random bytes of the same length, fsync, then unlink.
///
/// A crude anti-forensic measure for ciphertext deletion; it does not defeat
/// journaling or wear-leveled media, only naive recovery of the unlinked file.
pub fn shred(path: &Path) -> io::Result<()> {
    let len = fs::metadata(path)?.len() as usize;
    if len > 0 {
        let mut noise = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut noise);
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.write_all(&noise)?;
        file.sync_all()?;
    }
    debug!(path = %path.display(), bytes = len, "shredded file before unlink");
    fs::remove_file(path)
}

// ─── JsonDocStore ────────────────────────────────────────────────────────────

/// A single JSON document holding a `String -> T` map at a fixed path.
///
/// Load is self-healing: a missing or malformed document yields an empty map
/// (with a log line) instead of an error, so construction never fails on bad
/// state. Saves rewrite the whole document atomically.
pub struct JsonDocStore {
    path: PathBuf,
}

impl JsonDocStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. Returns an empty map if the file is missing or corrupt.
    pub fn load<T: for<'de> Deserialize<'de>>(&self) -> HashMap<String, T> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt document, starting fresh");
                HashMap::new()
            }),
            Err(_) => {
                debug!(path = %self.path.display(), "no document, starting fresh");
                HashMap::new()
            }
        }
    }

    /// Atomically rewrite the whole document with owner-only permissions.
    pub fn save<T: Serialize>(&self, data: &HashMap<String, T>) -> io::Result<()> {
        let content = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
        write_secure(&self.path, content.as_bytes())
    }
}
