//! Envelope encryption for TalonVault credentials.
//!
//! A sealed credential is `salt(32) || nonce(12) || ciphertext+tag` plus an
//! independent HMAC-SHA256 digest over that whole envelope. The encryption
//! key comes from PBKDF2-HMAC-SHA256 over the master key and a fresh random
//! salt, with the iteration count scaled by the credential's security level;
//! the digest key comes from a second, fast PBKDF2 pass over the encryption
//! key. AES-256-GCM carries `"{security_level}:{environment}"` as associated
//! data, binding each ciphertext to its tier and namespace.
//!
//! # Security notes
//! - The digest is verified first, in constant time, before any decryption.
//! - HMAC and AEAD failures surface as one error so callers cannot locate
//!   the tampering.
//! - Key material lives in [`Zeroizing`] buffers and is wiped on drop.

#![forbid(unsafe_code)]

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use talon_types::SecurityLevel;
use tracing::debug;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Per-envelope random salt length.
pub const SALT_LEN: usize = 32;
/// AES-GCM nonce length (96 bits is the standard).
pub const NONCE_LEN: usize = 12;
/// Derived key length (AES-256).
pub const KEY_LEN: usize = 32;
/// HMAC-SHA256 digest length.
pub const DIGEST_LEN: usize = 32;
/// AES-GCM authentication tag length.
const TAG_LEN: usize = 16;

/// Default base iteration count for the main KDF, before level scaling.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
/// Iterations for the digest-key pass. Its input is a full-entropy 256-bit
/// key, not a passphrase, so it needs no brute-force stretching.
pub const DIGEST_KDF_ITERATIONS: u32 = 1000;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The envelope failed integrity verification. Digest and cipher
    /// failures both map here.
    #[error("integrity verification failed")]
    IntegrityFailure,
    /// The blob is structurally too short to be an envelope.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("encryption failed")]
    EncryptFailure,
}

// ─── MasterKey ───────────────────────────────────────────────────────────────

/// Master key material, used only as KDF input.
///
/// `Debug` redacts the bytes; the buffer is zeroed on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl MasterKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Generate fresh random key material, hex-encoded for transport in an
    /// environment variable.
    pub fn generate_hex() -> String {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        hex::encode(bytes.as_slice())
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

// ─── SealedSecret ────────────────────────────────────────────────────────────

/// An encrypted credential: envelope (`salt || nonce || ciphertext`) and its
/// keyed digest. Two values in the API, one concatenated blob on disk.
#[derive(Clone)]
pub struct SealedSecret {
    pub envelope: Vec<u8>,
    pub digest: Vec<u8>,
}

impl SealedSecret {
    /// Serialize as `envelope || digest` for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.envelope.len() + self.digest.len());
        out.extend_from_slice(&self.envelope);
        out.extend_from_slice(&self.digest);
        out
    }

    /// Split a stored blob back into envelope and digest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < SALT_LEN + NONCE_LEN + TAG_LEN + DIGEST_LEN {
            return Err(CryptoError::Malformed(format!(
                "{} bytes is below the envelope minimum",
                bytes.len()
            )));
        }
        let (envelope, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        Ok(Self {
            envelope: envelope.to_vec(),
            digest: digest.to_vec(),
        })
    }
}

/// Custom `Debug` that never prints envelope bytes.
impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecret")
            .field("envelope", &"[REDACTED]")
            .field("digest", &"[REDACTED]")
            .finish()
    }
}

// ─── EnvelopeCipher ──────────────────────────────────────────────────────────

/// Seals UTF-8 secrets into tamper-evident envelopes and opens them again.
///
/// One cipher per environment: the AAD ties every ciphertext to the
/// environment it was sealed in, so an envelope copied across environments
/// or security levels fails to open.
pub struct EnvelopeCipher {
    master: MasterKey,
    environment: String,
    base_iterations: u32,
}

impl EnvelopeCipher {
    pub fn new(master: MasterKey, environment: impl Into<String>, base_iterations: u32) -> Self {
        Self {
            master,
            environment: environment.into(),
            base_iterations,
        }
    }

    /// Encrypt `plaintext` at the given security level.
    ///
    /// Salt and nonce are freshly random per call; the derived keys are
    /// wiped when this returns.
    pub fn seal(&self, plaintext: &[u8], level: SecurityLevel) -> Result<SealedSecret, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt, level);
        let cipher =
            Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CryptoError::EncryptFailure)?;
        let aad = self.aad(level);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptFailure)?;

        let mut envelope = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        let digest_key = derive_digest_key(key.as_slice(), &salt);
        let digest = envelope_digest(digest_key.as_slice(), &envelope)?;

        debug!(level = %level, bytes = envelope.len(), "sealed credential envelope");
        Ok(SealedSecret { envelope, digest })
    }

    /// Verify and decrypt a sealed credential.
    ///
    /// The digest check runs first; a mismatch rejects the envelope without
    /// attempting decryption. A wrong security level or environment fails
    /// the same way.
    pub fn open(
        &self,
        sealed: &SealedSecret,
        level: SecurityLevel,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if sealed.envelope.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed(format!(
                "{} bytes is below the envelope minimum",
                sealed.envelope.len()
            )));
        }
        if sealed.digest.len() != DIGEST_LEN {
            return Err(CryptoError::Malformed(format!(
                "digest is {} bytes, expected {DIGEST_LEN}",
                sealed.digest.len()
            )));
        }

        let (salt, rest) = sealed.envelope.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(salt, level);
        let digest_key = derive_digest_key(key.as_slice(), salt);
        let mut mac = <HmacSha256 as Mac>::new_from_slice(digest_key.as_slice())
            .map_err(|_| CryptoError::IntegrityFailure)?;
        mac.update(&sealed.envelope);
        mac.verify_slice(&sealed.digest)
            .map_err(|_| CryptoError::IntegrityFailure)?;

        let cipher =
            Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CryptoError::IntegrityFailure)?;
        let aad = self.aad(level);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::IntegrityFailure)?;

        Ok(Zeroizing::new(plaintext))
    }

    /// One fresh PBKDF2 derivation per call; the iteration count scales with
    /// the security level.
    fn derive_key(&self, salt: &[u8], level: SecurityLevel) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        let iterations = self.base_iterations.saturating_mul(level.kdf_cost_factor());
        pbkdf2_hmac::<Sha256>(&self.master.bytes, salt, iterations, key.as_mut_slice());
        key
    }

    fn aad(&self, level: SecurityLevel) -> String {
        format!("{}:{}", level, self.environment)
    }
}

/// Second, fast KDF pass: digest key from the encryption key and salt.
fn derive_digest_key(encryption_key: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(encryption_key, salt, DIGEST_KDF_ITERATIONS, key.as_mut_slice());
    key
}

fn envelope_digest(digest_key: &[u8], envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(digest_key).map_err(|_| CryptoError::EncryptFailure)?;
    mac.update(envelope);
    Ok(mac.finalize().into_bytes().to_vec())
}
