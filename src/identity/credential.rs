//! # Credential Material
//!
//! Generation and fingerprinting of device network credentials.
//!
//! ## Invariants
//! - CRED-1: Secrets are stored only as SHA-256 fingerprints
//! - CRED-2: Fingerprint comparison is constant-time

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Kind of credential registered for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialType {
    PreSharedKey,
    Certificate,
}

impl CredentialType {
    /// Returns the string representation used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::PreSharedKey => "PRE_SHARED_KEY",
            CredentialType::Certificate => "CERTIFICATE",
        }
    }
}

/// Freshly generated credential material.
///
/// The raw secret exists only in this value; everything stored downstream
/// keeps the fingerprint.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Credential id referenced by registrations.
    pub id: String,
    /// Raw secret, handed to the device during activation.
    pub secret: String,
    /// Credential kind.
    pub kind: CredentialType,
}

impl Credential {
    /// Generate a fresh pre-shared-key credential.
    ///
    /// The secret is a 256-bit random value, base64url-encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let secret =
            base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes);
        Self {
            id: format!("cred-{}", Uuid::new_v4()),
            secret,
            kind: CredentialType::PreSharedKey,
        }
    }

    /// SHA-256 fingerprint of the secret, base64url-encoded.
    ///
    /// # Invariant
    /// CRED-1: Secrets are stored only as fingerprints.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.secret)
    }
}

/// Fingerprint an arbitrary secret.
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, digest)
}

/// Constant-time comparison of two fingerprints.
///
/// # Invariant
/// CRED-2: Fingerprint comparison is constant-time.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
