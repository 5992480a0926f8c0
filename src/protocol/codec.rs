//! Transmission Codec
//!
//! Turns a `Transmission` into a single opaque line and back: canonical
//! JSON, AES-256-GCM under the static shared cluster key, then base64.
//! The random 96-bit nonce is prefixed to the ciphertext inside the
//! base64 payload.
//!
//! Decoding is total: any base64, decryption, parse or family-validation
//! failure is logged and yields `None`. Nothing a remote peer sends can
//! surface as an error past this module.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::types::{MessageFamily, Transmission};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Expands the configured shared secret into a 256-bit key.
///
/// The shared secret is the cluster's only integrity control; this is a
/// plain wrap-around expansion, not a KDF, matching the trust level of a
/// static symmetric envelope.
pub fn key_from_secret(secret: &str) -> [u8; 32] {
    let bytes = secret.as_bytes();
    let mut key = [0u8; 32];
    // An empty secret expands to the zero key; startup validation rejects
    // it before any envelope is cut.
    if bytes.is_empty() {
        return key;
    }
    for (i, slot) in key.iter_mut().enumerate() {
        *slot = bytes[i % bytes.len()];
    }
    key
}

/// Encodes a transmission to its opaque wire form.
pub fn encode(transmission: &Transmission, key: &[u8; 32]) -> Result<String> {
    let plain = serde_json::to_vec(transmission)?;

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("bad envelope key: {e}"))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plain.as_ref())
        .map_err(|e| anyhow!("envelope encryption failed: {e}"))?;

    let mut container = Vec::with_capacity(NONCE_LEN + sealed.len());
    container.extend_from_slice(&nonce);
    container.extend_from_slice(&sealed);

    Ok(BASE64.encode(container))
}

/// Decodes an opaque line, validating it belongs to `expected_family`.
///
/// Returns `None` on any failure; each failure path is logged once.
pub fn decode(line: &str, key: &[u8; 32], expected_family: MessageFamily) -> Option<Transmission> {
    let container = match BASE64.decode(line.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Dropping transmission with invalid base64: {}", e);
            return None;
        }
    };

    if container.len() < NONCE_LEN {
        tracing::warn!(
            "Dropping transmission shorter than the nonce ({} bytes)",
            container.len()
        );
        return None;
    }

    let cipher = match Aes256Gcm::new_from_slice(key) {
        Ok(cipher) => cipher,
        Err(e) => {
            tracing::error!("Envelope key rejected by cipher: {}", e);
            return None;
        }
    };

    let nonce = Nonce::from_slice(&container[..NONCE_LEN]);
    let plain = match cipher.decrypt(nonce, &container[NONCE_LEN..]) {
        Ok(plain) => plain,
        Err(_) => {
            // Deliberately unauthenticated peers land here; no detail to log.
            tracing::warn!("Dropping transmission that failed authenticated decryption");
            return None;
        }
    };

    let transmission: Transmission = match serde_json::from_slice(&plain) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!("Dropping undecipherable transmission payload: {}", e);
            return None;
        }
    };

    if transmission.directive.family() != expected_family {
        tracing::warn!(
            "Dropping {:?}: wrong message family for this endpoint",
            transmission.directive
        );
        return None;
    }

    Some(transmission)
}
