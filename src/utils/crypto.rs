// Cryptographic utilities for sealing session cookies and generating random values

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Random bytes behind a login state nonce. Encodes to 43 characters.
pub const STATE_NONCE_BYTES: usize = 32;

/// Random bytes behind a newly registered client secret
pub const CLIENT_SECRET_BYTES: usize = 55;

/// Generate the state nonce bound to one login attempt
#[must_use]
pub fn generate_state_nonce() -> String {
    generate_nonce(STATE_NONCE_BYTES)
}

/// Generate `length` random bytes, base64url encoded without padding
#[must_use]
pub fn generate_nonce(length: usize) -> String {
    let mut nonce = vec![0u8; length];
    rand::rng().fill_bytes(&mut nonce);
    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}

/// Generate raw client secret bytes
#[must_use]
pub fn generate_client_secret() -> Vec<u8> {
    let mut secret = vec![0u8; CLIENT_SECRET_BYTES];
    rand::rng().fill_bytes(&mut secret);
    secret
}

/// Compare two strings without an early exit on the first differing byte
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Encrypt any serializable value with AES-256-GCM
///
/// The result is base64url(nonce || ciphertext).
///
/// # Errors
///
/// Returns an error if the key length is wrong, serialization fails or
/// encryption fails.
pub fn encrypt_data<T: Serialize>(data: &T, key: &[u8]) -> Result<String> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {} bytes, got {}",
            ENCRYPTION_KEY_SIZE,
            key.len()
        ));
    }

    let json_data = serde_json::to_vec(data).context("Failed to serialize data")?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, json_data.as_slice())
        .map_err(|e| anyhow!("AES encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&combined))
}

/// Decrypt a value produced by [`encrypt_data`]
///
/// # Errors
///
/// Returns an error if the key length is wrong, the input is not valid
/// base64url, authentication fails, or the plaintext does not deserialize.
pub fn decrypt_data<T: DeserializeOwned>(encrypted_data: &str, key: &[u8]) -> Result<T> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {} bytes, got {}",
            ENCRYPTION_KEY_SIZE,
            key.len()
        ));
    }

    let combined = general_purpose::URL_SAFE_NO_PAD
        .decode(encrypted_data)
        .context("Failed to decode base64 data")?;

    if combined.len() < NONCE_SIZE {
        return Err(anyhow!("Invalid data length"));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("AES decryption failed: {e}"))?;

    serde_json::from_slice(&plaintext).context("Failed to deserialize data from decrypted JSON")
}

/// Derive the 32-byte cookie key from the configured session secret
#[must_use]
pub fn derive_encryption_key(session_secret: &str) -> [u8; ENCRYPTION_KEY_SIZE] {
    let digest = Sha256::digest(session_secret.as_bytes());
    let mut key = [0u8; ENCRYPTION_KEY_SIZE];
    key.copy_from_slice(&digest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        state: String,
        count: u32,
    }

    #[test]
    fn test_state_nonce_length_and_uniqueness() {
        let a = generate_state_nonce();
        let b = generate_state_nonce();
        assert_eq!(a.len(), 43);
        assert!(a.len() >= 32);
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn test_client_secret_length() {
        assert_eq!(generate_client_secret().len(), CLIENT_SECRET_BYTES);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = derive_encryption_key("test-secret");
        let payload = Payload {
            state: "abc".to_string(),
            count: 3,
        };
        let sealed = encrypt_data(&payload, &key).unwrap();
        let opened: Payload = decrypt_data(&sealed, &key).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let sealed = encrypt_data(&"value", &derive_encryption_key("one")).unwrap();
        let result: Result<String> = decrypt_data(&sealed, &derive_encryption_key("two"));
        assert!(result.is_err());

        let result: Result<String> = decrypt_data("%%%", &derive_encryption_key("one"));
        assert!(result.is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
