//! Core types for the keystore.
//!
//! - [`SecretName`]: a validated key under which a secret is stored
//! - [`SecretValue`]: plaintext secret bytes that zeroize on drop
//! - [`SecretRecord`]: the on-disk encrypted record for one secret
//! - [`KeysetMetadata`]: rotation bookkeeping for the active key
//! - [`RotationPolicy`]: rotation schedule configuration
//! - [`Status`]: health report of a manager

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// A validated secret key.
///
/// Secret names double as file names inside the store, so they must:
/// - Be between 1 and 200 characters
/// - Contain only ASCII alphanumeric characters, hyphens, underscores, and periods
/// - Start with an alphanumeric character
/// - Not end with a hyphen or period
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretName(String);

impl SecretName {
    /// Maximum length of a secret name.
    pub const MAX_LENGTH: usize = 200;

    /// Creates a new `SecretName` after validating the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSecretKey`] if the name is invalid.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidSecretKey { reason };

        let Some(first) = name.chars().next() else {
            return Err(invalid("key cannot be empty".to_string()));
        };

        if name.len() > Self::MAX_LENGTH {
            return Err(invalid(format!(
                "key exceeds maximum length of {} characters",
                Self::MAX_LENGTH
            )));
        }

        if !first.is_ascii_alphanumeric() {
            return Err(invalid(
                "key must start with an alphanumeric character".to_string(),
            ));
        }

        if name.ends_with('-') || name.ends_with('.') {
            return Err(invalid("key cannot end with a hyphen or period".to_string()));
        }

        if let Some(c) = name
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(format!(
                "key contains invalid character '{c}'; only alphanumerics, hyphens, underscores, and periods are allowed"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SecretName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SecretName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SecretName> for String {
    fn from(name: SecretName) -> Self {
        name.0
    }
}

impl AsRef<str> for SecretName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Plaintext secret bytes that are zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue {
    data: Vec<u8>,
}

impl SecretValue {
    /// Wraps plaintext bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the plaintext as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the length of the plaintext.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the plaintext is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the value and returns it as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the bytes are not valid UTF-8.
    pub fn into_string(self) -> Result<String> {
        let mut this = std::mem::ManuallyDrop::new(self);
        let bytes = std::mem::take(&mut this.data);
        String::from_utf8(bytes).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            Error::Serialization {
                reason: "secret value is not valid UTF-8".to_string(),
            }
        })
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("len", &self.data.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.data.ct_eq(&other.data).into()
    }
}

impl Eq for SecretValue {}

/// Rotation schedule configuration.
///
/// Only `interval_seconds` drives behavior: it sets
/// [`KeysetMetadata::next_rotation`]. An interval of zero is treated as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationPolicy {
    /// Time between scheduled rotations, in seconds.
    pub interval_seconds: Option<u64>,
    /// Maximum age of a key before it must be rotated, in seconds.
    ///
    /// Carried in configuration but not enforced.
    pub max_age_seconds: Option<u64>,
    /// Maximum number of key versions to retain.
    ///
    /// Carried in configuration but not enforced; only the active key is kept.
    pub max_versions: Option<u32>,
}

impl RotationPolicy {
    /// Creates a policy that rotates every `interval_seconds`.
    #[must_use]
    pub const fn every(interval_seconds: u64) -> Self {
        Self {
            interval_seconds: Some(interval_seconds),
            max_age_seconds: None,
            max_versions: None,
        }
    }

    /// Returns the rotation interval, if one is configured and non-zero.
    #[must_use]
    pub fn interval(&self) -> Option<TimeDelta> {
        self.interval_seconds
            .filter(|secs| *secs > 0)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
    }

    /// Computes the next scheduled rotation after `last_rotated`.
    #[must_use]
    pub fn next_rotation_after(&self, last_rotated: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval()
            .and_then(|interval| last_rotated.checked_add_signed(interval))
    }
}

/// The persisted form of one secret.
///
/// `key_version` is the version of the key that produced `ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Opaque AEAD output (`nonce || ciphertext || tag`), base64 in JSON.
    #[serde(rename = "value", with = "b64")]
    pub ciphertext: Vec<u8>,
    /// When the secret was first stored.
    pub created_at: DateTime<Utc>,
    /// When the ciphertext was last replaced.
    pub updated_at: DateTime<Utc>,
    /// Version of the key that encrypted `ciphertext`.
    pub key_version: u32,
}

impl SecretRecord {
    /// Creates a record for a freshly encrypted value.
    #[must_use]
    pub fn new(ciphertext: Vec<u8>, key_version: u32) -> Self {
        let now = Utc::now();
        Self {
            ciphertext,
            created_at: now,
            updated_at: now,
            key_version,
        }
    }

    /// Replaces the ciphertext after re-encryption under `key_version`.
    pub fn reencrypted(&mut self, ciphertext: Vec<u8>, key_version: u32) {
        self.ciphertext = ciphertext;
        self.key_version = key_version;
        self.updated_at = Utc::now();
    }
}

/// Rotation bookkeeping for the store's active key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetMetadata {
    /// Version of the active key; starts at 1, +1 per rotation.
    pub current_version: u32,
    /// When the store was created.
    pub created_at: DateTime<Utc>,
    /// When the active key was put in place.
    pub last_rotated: DateTime<Utc>,
    /// When the next rotation is due, if a rotation interval is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_rotation: Option<DateTime<Utc>>,
}

impl KeysetMetadata {
    /// Metadata for a brand-new store at version 1.
    #[must_use]
    pub fn initial(now: DateTime<Utc>, policy: Option<&RotationPolicy>) -> Self {
        Self {
            current_version: 1,
            created_at: now,
            last_rotated: now,
            next_rotation: policy.and_then(|p| p.next_rotation_after(now)),
        }
    }

    /// The metadata that results from one successful rotation at `now`.
    #[must_use]
    pub fn rotated(&self, now: DateTime<Utc>, policy: Option<&RotationPolicy>) -> Self {
        Self {
            current_version: self.current_version + 1,
            created_at: self.created_at,
            last_rotated: now,
            next_rotation: policy.and_then(|p| p.next_rotation_after(now)),
        }
    }

    /// Returns true if a scheduled rotation is due at `now`.
    #[must_use]
    pub fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        self.next_rotation.is_some_and(|next| next <= now)
    }
}

/// Health report of a secret manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Whether the manager can serve requests.
    pub healthy: bool,
    /// Human-readable state description.
    pub message: String,
    /// When the active key was put in place, if initialized.
    pub last_rotated: Option<DateTime<Utc>>,
    /// Whether the rotation interval has elapsed.
    pub rotation_due: bool,
}

impl Status {
    pub(crate) fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            last_rotated: None,
            rotation_due: false,
        }
    }
}

/// Serde adapter storing byte blobs as standard base64 strings.
pub(crate) mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
