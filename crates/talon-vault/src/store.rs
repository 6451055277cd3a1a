//! Storage backends for sealed credentials.
//!
//! Two implementations of one contract, selected by security level at write
//! time: [`EphemeralStore`] keeps everything in memory and dies with the
//! process, [`PersistentStore`] writes one ciphertext file per credential
//! plus a single metadata document.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use talon_crypto::SealedSecret;
use talon_persist::{shred, write_secure, JsonDocStore};
use talon_types::CredentialMetadata;
use tracing::warn;

use crate::error::{CredentialError, CredentialResult};
use crate::{ENCRYPTED_DIR, METADATA_DIR, METADATA_FILE};

/// Common contract over both backends. Uniqueness of an id across stores is
/// enforced by the vault, not here; `put` replaces silently.
pub trait CredentialStore {
    fn contains(&self, credential_id: &str) -> bool;
    fn get(&self, credential_id: &str) -> Option<&CredentialMetadata>;
    fn get_mut(&mut self, credential_id: &str) -> Option<&mut CredentialMetadata>;
    fn put(&mut self, metadata: CredentialMetadata, sealed: &SealedSecret) -> CredentialResult<()>;
    /// Ciphertext for an id whose metadata is present.
    fn sealed(&self, credential_id: &str) -> CredentialResult<SealedSecret>;
    fn delete(&mut self, credential_id: &str) -> CredentialResult<()>;
    fn list(&self) -> Vec<&CredentialMetadata>;
    /// Flush metadata. No-op for the ephemeral store.
    fn persist(&self) -> CredentialResult<()>;
}

// ─── Ephemeral ───────────────────────────────────────────────────────────────

struct StoredCredential {
    metadata: CredentialMetadata,
    sealed: SealedSecret,
}

/// In-memory backend for EPHEMERAL credentials. Never touches disk.
#[derive(Default)]
pub struct EphemeralStore {
    entries: HashMap<String, StoredCredential>,
}

impl CredentialStore for EphemeralStore {
    fn contains(&self, credential_id: &str) -> bool {
        self.entries.contains_key(credential_id)
    }

    fn get(&self, credential_id: &str) -> Option<&CredentialMetadata> {
        self.entries.get(credential_id).map(|e| &e.metadata)
    }

    fn get_mut(&mut self, credential_id: &str) -> Option<&mut CredentialMetadata> {
        self.entries.get_mut(credential_id).map(|e| &mut e.metadata)
    }

    fn put(&mut self, metadata: CredentialMetadata, sealed: &SealedSecret) -> CredentialResult<()> {
        self.entries.insert(
            metadata.credential_id.clone(),
            StoredCredential {
                metadata,
                sealed: sealed.clone(),
            },
        );
        Ok(())
    }

    fn sealed(&self, credential_id: &str) -> CredentialResult<SealedSecret> {
        self.entries
            .get(credential_id)
            .map(|e| e.sealed.clone())
            .ok_or_else(|| CredentialError::NotFound(credential_id.to_string()))
    }

    fn delete(&mut self, credential_id: &str) -> CredentialResult<()> {
        self.entries.remove(credential_id);
        Ok(())
    }

    fn list(&self) -> Vec<&CredentialMetadata> {
        self.entries.values().map(|e| &e.metadata).collect()
    }

    fn persist(&self) -> CredentialResult<()> {
        Ok(())
    }
}

// ─── Persistent ──────────────────────────────────────────────────────────────

/// Disk-backed backend: `encrypted/<id>.enc` per credential and one JSON
/// metadata document, both written atomically with owner-only permissions.
pub struct PersistentStore {
    encrypted_dir: PathBuf,
    doc: JsonDocStore,
    entries: HashMap<String, CredentialMetadata>,
}

impl PersistentStore {
    /// Load the metadata document under `env_root`. A corrupt document
    /// resets to empty rather than failing startup.
    pub fn open(env_root: &Path) -> Self {
        let doc = JsonDocStore::new(env_root.join(METADATA_DIR).join(METADATA_FILE));
        let entries = doc.load();
        Self {
            encrypted_dir: env_root.join(ENCRYPTED_DIR),
            doc,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enc_path(&self, credential_id: &str) -> PathBuf {
        self.encrypted_dir.join(format!("{credential_id}.enc"))
    }
}

impl CredentialStore for PersistentStore {
    fn contains(&self, credential_id: &str) -> bool {
        self.entries.contains_key(credential_id)
    }

    fn get(&self, credential_id: &str) -> Option<&CredentialMetadata> {
        self.entries.get(credential_id)
    }

    fn get_mut(&mut self, credential_id: &str) -> Option<&mut CredentialMetadata> {
        self.entries.get_mut(credential_id)
    }

    fn put(&mut self, metadata: CredentialMetadata, sealed: &SealedSecret) -> CredentialResult<()> {
        write_secure(&self.enc_path(&metadata.credential_id), &sealed.to_bytes())?;
        self.entries.insert(metadata.credential_id.clone(), metadata);
        Ok(())
    }

    fn sealed(&self, credential_id: &str) -> CredentialResult<SealedSecret> {
        let bytes = fs::read(self.enc_path(credential_id))?;
        Ok(SealedSecret::from_bytes(&bytes)?)
    }

    /// Overwrites the ciphertext file with random bytes before unlinking,
    /// then drops the metadata entry.
    fn delete(&mut self, credential_id: &str) -> CredentialResult<()> {
        let path = self.enc_path(credential_id);
        if path.exists() {
            shred(&path)?;
        } else {
            warn!(credential_id = %credential_id, "ciphertext file already missing");
        }
        self.entries.remove(credential_id);
        Ok(())
    }

    fn list(&self) -> Vec<&CredentialMetadata> {
        self.entries.values().collect()
    }

    fn persist(&self) -> CredentialResult<()> {
        self.doc.save(&self.entries)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_crypto::{EnvelopeCipher, MasterKey};
    use talon_types::{CredentialType, SecurityLevel};

    fn cipher() -> EnvelopeCipher {
        EnvelopeCipher::new(MasterKey::new(b"store-test-master".to_vec()), "testenv", 1000)
    }

    fn meta(id: &str, level: SecurityLevel) -> CredentialMetadata {
        CredentialMetadata::new(id, CredentialType::ApiKey, level, "testenv")
    }

    #[test]
    fn test_ephemeral_roundtrip() {
        let cipher = cipher();
        let sealed = cipher
            .seal(b"in-memory-only", SecurityLevel::Ephemeral)
            .expect("seal");

        let mut store = EphemeralStore::default();
        store
            .put(meta("session", SecurityLevel::Ephemeral), &sealed)
            .expect("put");

        assert!(store.contains("session"));
        let back = store.sealed("session").expect("sealed");
        let plain = cipher.open(&back, SecurityLevel::Ephemeral).expect("open");
        assert_eq!(plain.as_slice(), b"in-memory-only");

        store.delete("session").expect("delete");
        assert!(!store.contains("session"));
        assert!(store.sealed("session").is_err());
    }

    #[test]
    fn test_persistent_roundtrip_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cipher = cipher();
        let sealed = cipher.seal(b"on-disk", SecurityLevel::High).expect("seal");

        {
            let mut store = PersistentStore::open(dir.path());
            store.put(meta("db", SecurityLevel::High), &sealed).expect("put");
            store.persist().expect("persist");
            assert!(dir.path().join("encrypted").join("db.enc").exists());
        }

        let store = PersistentStore::open(dir.path());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("db").expect("get").security_level, SecurityLevel::High);

        let back = store.sealed("db").expect("sealed");
        let plain = cipher.open(&back, SecurityLevel::High).expect("open");
        assert_eq!(plain.as_slice(), b"on-disk");
    }

    #[test]
    fn test_persistent_delete_removes_ciphertext() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cipher = cipher();
        let sealed = cipher.seal(b"gone soon", SecurityLevel::Standard).expect("seal");

        let mut store = PersistentStore::open(dir.path());
        store
            .put(meta("temp", SecurityLevel::Standard), &sealed)
            .expect("put");
        let enc = dir.path().join("encrypted").join("temp.enc");
        assert!(enc.exists());

        store.delete("temp").expect("delete");
        store.persist().expect("persist");
        assert!(!enc.exists());
        assert!(!store.contains("temp"));

        let reloaded = PersistentStore::open(dir.path());
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_persistent_delete_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cipher = cipher();
        let sealed = cipher.seal(b"x", SecurityLevel::Standard).expect("seal");

        let mut store = PersistentStore::open(dir.path());
        store.put(meta("gone", SecurityLevel::Standard), &sealed).expect("put");
        fs::remove_file(dir.path().join("encrypted").join("gone.enc")).expect("remove");

        store.delete("gone").expect("delete");
        assert!(!store.contains("gone"));
    }

    #[test]
    fn test_missing_ciphertext_is_storage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PersistentStore::open(dir.path());
        let err = store.sealed("nope").expect_err("should fail");
        assert!(matches!(err, CredentialError::Storage(_)));
    }
}
