//! AES-256-GCM block encryption and Argon2id key derivation.
//!
//! Block framing:  [ nonce (12 B) | ciphertext (data size) | GCM tag (16 B) ]
//! Per-block key:  keyed-BLAKE3(master key, LE block index)
//! Header (60 B):  master key sealed under BLAKE3(entire encrypted payload)
//!
//! Because the header's wrapping key is the hash of the whole payload,
//! the key can only be recovered once every block is present: opening an
//! existing file and syncing after writes both require a full payload
//! pass, which [`CryptoTransform`] requests through the transform
//! protocol's full-read signal.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use std::io::Read;
use thiserror::Error;

use crate::transform::{pad_payload, HeaderOutcome, InitOutcome, Transform, TransformError};

/// Byte length of the AES-GCM nonce prepended to every sealed payload.
pub const NONCE_LEN: usize = 12;
/// Byte length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Byte length of the crypto header: a sealed 32-byte master key.
pub const CRYPTO_HEADER_LEN: usize = NONCE_LEN + 32 + TAG_LEN;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed — wrong key or corrupted data")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Sealed payload too short (minimum {NONCE_LEN} bytes)")]
    TooShort,
}

/// Derive a 256-bit key from a password and a salt using Argon2id.
///
/// Suitable for [`CryptoTransform::with_key`] when the master key should
/// come from a password rather than the OS RNG.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let params = Params::new(64 * 1024, 3, 1, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Seal `plaintext` with AES-256-GCM using a random nonce.
///
/// Returns `nonce (12 B) || ciphertext || GCM tag (16 B)`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open an AES-256-GCM payload produced by [`seal`].
pub fn open(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::TooShort);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    let nonce = aes_gcm::Nonce::from_slice(&data[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &data[NONCE_LEN..])
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key.copy_from_slice(&Aes256Gcm::generate_key(&mut AeadOsRng));
    key
}

// ── CryptoTransform ──────────────────────────────────────────────────────────

/// Authenticated per-block encryption with a payload-hash-wrapped key.
///
/// New files use the key supplied at construction (or a random one);
/// when opening an existing file the master key is recovered from the
/// stored header during the full-read pass, so the file is readable only
/// when the entire payload is available and intact.
pub struct CryptoTransform {
    data_size: usize,
    master_key: [u8; 32],
    stored_header: Option<Vec<u8>>,
    dirty: bool,
}

impl CryptoTransform {
    /// A transform with a freshly generated random master key.
    pub fn new(data_size: usize) -> Self {
        Self::with_key(random_key(), data_size)
    }

    /// A transform with a caller-supplied master key, e.g. one produced
    /// by [`derive_key`].  The key only matters when creating a file;
    /// opening an existing file recovers the stored key instead.
    pub fn with_key(key: [u8; 32], data_size: usize) -> Self {
        debug_assert!(data_size > 0, "transform with zero data size");
        Self {
            data_size,
            master_key: key,
            stored_header: None,
            dirty: false,
        }
    }

    fn block_key(&self, index: u64) -> [u8; 32] {
        blake3::keyed_hash(&self.master_key, &index.to_le_bytes()).into()
    }
}

impl Transform for CryptoTransform {
    fn header_size(&self) -> usize {
        CRYPTO_HEADER_LEN
    }

    fn block_size(&self) -> usize {
        NONCE_LEN + self.data_size + TAG_LEN
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn init(&mut self, header: Option<&[u8]>) -> Result<InitOutcome, TransformError> {
        match header {
            None => {
                // New file: the header must be persisted on first sync.
                self.dirty = true;
                Ok(InitOutcome::Ready)
            }
            Some(h) => {
                if h.len() < CRYPTO_HEADER_LEN {
                    return Err(TransformError::Header(format!(
                        "crypto header truncated at {} bytes",
                        h.len()
                    )));
                }
                self.stored_header = Some(h[..CRYPTO_HEADER_LEN].to_vec());
                Ok(InitOutcome::FullReadRequired)
            }
        }
    }

    fn sync_header(&mut self) -> Result<HeaderOutcome, TransformError> {
        if self.dirty {
            Ok(HeaderOutcome::FullReadRequired)
        } else {
            Ok(HeaderOutcome::Unchanged)
        }
    }

    fn full_read(&mut self, payload: &mut dyn Read) -> Result<Option<Vec<u8>>, TransformError> {
        let mut hasher = blake3::Hasher::new();
        std::io::copy(payload, &mut hasher)?;
        let wrap_key: [u8; 32] = hasher.finalize().into();

        match self.stored_header.take() {
            // Open path: unwrap the stored master key.
            Some(h) => {
                let key = open(&wrap_key, &h).map_err(|e| TransformError::Header(e.to_string()))?;
                if key.len() != 32 {
                    return Err(TransformError::Header(
                        "crypto header holds a key of the wrong length".to_string(),
                    ));
                }
                self.master_key.copy_from_slice(&key);
                self.dirty = false;
                Ok(None)
            }
            // Sync path: rewrap under the current payload hash.  The
            // header stays dirty until the store confirms the write.
            None => {
                let header = seal(&wrap_key, &self.master_key)
                    .map_err(|e| TransformError::Header(e.to_string()))?;
                Ok(Some(header))
            }
        }
    }

    fn header_persisted(&mut self) {
        self.dirty = false;
    }

    fn read_block(&mut self, index: u64, block: &[u8]) -> Result<Vec<u8>, TransformError> {
        if block.len() < self.block_size() {
            return Err(TransformError::Block {
                index,
                reason: format!("short frame: {} bytes", block.len()),
            });
        }
        let key = self.block_key(index);
        open(&key, block).map_err(|_| TransformError::Block {
            index,
            reason: "authentication failed".to_string(),
        })
    }

    fn write_block(&mut self, index: u64, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        let padded = pad_payload(data, self.data_size).ok_or_else(|| TransformError::Block {
            index,
            reason: format!(
                "payload of {} bytes exceeds data size {}",
                data.len(),
                self.data_size
            ),
        })?;
        let key = self.block_key(index);
        let frame = seal(&key, &padded).map_err(|e| TransformError::Block {
            index,
            reason: e.to_string(),
        })?;
        self.dirty = true;
        Ok(frame)
    }
}
