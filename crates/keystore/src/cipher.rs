//! Authenticated encryption for secret records.
//!
//! ChaCha20-Poly1305 with a random 96-bit nonce per encryption. Each record is
//! sealed under a key derived from the data key and the record's name, so a
//! record file copied under another name does not decrypt.

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::types::SecretName;

/// Size of a data key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

const RECORD_KEY_CONTEXT: &str = "keystore record v1";

/// Raw key material, zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly [`KEY_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::DecryptionError {
            reason: format!("key must be exactly {KEY_SIZE} bytes, got {}", bytes.len()),
        })?;
        Ok(Self { bytes })
    }

    /// Creates a key from a fixed-size array.
    #[must_use]
    pub const fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives the per-record key for `name`.
    #[must_use]
    pub fn derive_for_record(&self, name: &SecretName) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(RECORD_KEY_CONTEXT);
        hasher.update(&self.bytes);
        hasher.update(name.as_str().as_bytes());
        Self {
            bytes: *hasher.finalize().as_bytes(),
        }
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts `plaintext` under `key`.
///
/// Output layout: `nonce || ciphertext || tag`.
///
/// # Errors
///
/// Returns [`Error::EncryptionError`] if the AEAD refuses the input.
pub fn encrypt(key: &DataKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.bytes));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::EncryptionError {
            reason: format!("encryption failed: {e}"),
        })?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypts output of [`encrypt`].
///
/// # Errors
///
/// Returns [`Error::DecryptionError`] if the input is truncated, was produced
/// under another key, or has been tampered with.
pub fn decrypt(key: &DataKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionError {
            reason: format!(
                "ciphertext too short: expected at least {} bytes, got {}",
                NONCE_SIZE + TAG_SIZE,
                ciphertext.len()
            ),
        });
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.bytes));
    let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);

    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::DecryptionError {
            reason: "authentication failed (wrong key or tampered data)".to_string(),
        })
}

/// The active data key together with the version it was issued as.
///
/// Stateless beyond holding the key; swapped wholesale on rotation.
pub struct CipherEngine {
    key: DataKey,
    version: u32,
}

impl CipherEngine {
    /// Wraps an existing key issued as `version`.
    #[must_use]
    pub const fn new(key: DataKey, version: u32) -> Self {
        Self { key, version }
    }

    /// Creates an engine around a freshly generated key.
    #[must_use]
    pub fn generate(version: u32) -> Self {
        Self::new(DataKey::generate(), version)
    }

    /// The key version this engine encrypts as.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// The raw data key, used when persisting the keyset.
    #[must_use]
    pub const fn key(&self) -> &DataKey {
        &self.key
    }

    /// Encrypts the plaintext of the record `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionError`] on AEAD failure.
    pub fn encrypt(&self, name: &SecretName, plaintext: &[u8]) -> Result<Vec<u8>> {
        encrypt(&self.key.derive_for_record(name), plaintext)
    }

    /// Decrypts the ciphertext of the record `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecryptionError`] on mismatch or tampering.
    pub fn decrypt(&self, name: &SecretName, ciphertext: &[u8]) -> Result<Vec<u8>> {
        decrypt(&self.key.derive_for_record(name), ciphertext)
    }
}

impl std::fmt::Debug for CipherEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherEngine")
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> SecretName {
        SecretName::new(s).expect("valid name")
    }

    #[test]
    fn data_key_generate_is_random() {
        let key1 = DataKey::generate();
        let key2 = DataKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn data_key_from_bytes_wrong_length() {
        assert!(DataKey::from_bytes(&[0u8; 16]).is_err());
        assert!(DataKey::from_bytes(&[0u8; 64]).is_err());
        assert!(DataKey::from_bytes(&[7u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn data_key_debug_redacts() {
        let debug = format!("{:?}", DataKey::generate());
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn derive_for_record_is_stable_and_distinct() {
        let key = DataKey::from_array([3u8; KEY_SIZE]);
        let a = key.derive_for_record(&name("alpha"));
        let a_again = key.derive_for_record(&name("alpha"));
        let b = key.derive_for_record(&name("beta"));

        assert_eq!(a.as_bytes(), a_again.as_bytes());
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), key.as_bytes());
    }

    #[test]
    fn encrypt_produces_fresh_nonces() {
        let key = DataKey::generate();
        let ct1 = encrypt(&key, b"same").expect("encrypt 1");
        let ct2 = encrypt(&key, b"same").expect("encrypt 2");
        assert_ne!(ct1, ct2);
        assert_eq!(ct1.len(), NONCE_SIZE + 4 + TAG_SIZE);
    }

    #[test]
    fn decrypt_wrong_key_fails() {
        let ciphertext = encrypt(&DataKey::generate(), b"secret").expect("encrypt");
        let result = decrypt(&DataKey::generate(), &ciphertext);
        assert!(matches!(result, Err(Error::DecryptionError { .. })));
    }

    #[test]
    fn decrypt_tampered_data_fails() {
        let key = DataKey::generate();
        let mut ciphertext = encrypt(&key, b"secret message").expect("encrypt");
        if let Some(byte) = ciphertext.last_mut() {
            *byte ^= 0xFF;
        }
        assert!(decrypt(&key, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_too_short_fails() {
        let key = DataKey::generate();
        let result = decrypt(&key, &[0u8; NONCE_SIZE + TAG_SIZE - 1]);
        assert!(matches!(result, Err(Error::DecryptionError { .. })));
    }

    #[test]
    fn engine_binds_ciphertext_to_record_name() {
        let engine = CipherEngine::generate(1);
        let ciphertext = engine.encrypt(&name("first"), b"value").expect("encrypt");

        assert_eq!(
            engine.decrypt(&name("first"), &ciphertext).expect("decrypt"),
            b"value"
        );
        assert!(engine.decrypt(&name("second"), &ciphertext).is_err());
    }

    #[test]
    fn engine_debug_shows_version_only() {
        let debug = format!("{:?}", CipherEngine::generate(7));
        assert!(debug.contains("version: 7"));
        assert!(debug.contains("[REDACTED]"));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn engine_roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
                let engine = CipherEngine::generate(1);
                let record = name("prop-record");
                let ciphertext = engine.encrypt(&record, &plaintext).expect("encrypt");
                prop_assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
                prop_assert_eq!(engine.decrypt(&record, &ciphertext).expect("decrypt"), plaintext);
            }

            #[test]
            fn any_single_bit_flip_is_rejected(
                plaintext in prop::collection::vec(any::<u8>(), 1..64),
                position in any::<prop::sample::Index>(),
                bit in 0u8..8,
            ) {
                let key = DataKey::generate();
                let mut ciphertext = encrypt(&key, &plaintext).expect("encrypt");
                let idx = position.index(ciphertext.len());
                ciphertext[idx] ^= 1 << bit;
                prop_assert!(decrypt(&key, &ciphertext).is_err());
            }
        }
    }
}
