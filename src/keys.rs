//! Signing keypair loaded once at startup
//!
//! Keys are PEM files. Private keys may be PKCS#8 (`BEGIN PRIVATE KEY`) or
//! PKCS#1 (`BEGIN RSA PRIVATE KEY`); public keys may be SPKI or PKCS#1.
//! After loading, the pair is immutable and shared behind an `Arc`.

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use log::info;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::errors::{ConfigurationError, TokenError};

struct KeyPair {
    signing: SigningKey<Sha256>,
    verifying: VerifyingKey<Sha256>,
    key_id: String,
}

/// Process-wide RS256 keypair
#[derive(Clone)]
pub struct KeyManager {
    keys: Arc<KeyPair>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("key_id", &self.keys.key_id)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Load the keypair from disk
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing or unparsable, or if the
    /// public key does not belong to the private key.
    pub fn load(
        private_key_path: impl AsRef<Path>,
        public_key_path: impl AsRef<Path>,
    ) -> Result<Self, ConfigurationError> {
        let private_path = private_key_path.as_ref();
        let public_path = public_key_path.as_ref();

        let private_pem = read_key_file(private_path)?;
        let public_pem = read_key_file(public_path)?;

        let private_key = parse_private_key(&private_pem).map_err(|reason| {
            ConfigurationError::KeyParse {
                kind: "private",
                path: private_path.display().to_string(),
                reason,
            }
        })?;
        let public_key =
            parse_public_key(&public_pem).map_err(|reason| ConfigurationError::KeyParse {
                kind: "public",
                path: public_path.display().to_string(),
                reason,
            })?;

        let manager = Self::from_keys(private_key, public_key)?;
        info!(
            "Loaded signing keypair (kid {}) from {}",
            manager.key_id(),
            private_path.display()
        );
        Ok(manager)
    }

    fn from_keys(
        private_key: RsaPrivateKey,
        public_key: RsaPublicKey,
    ) -> Result<Self, ConfigurationError> {
        if RsaPublicKey::from(&private_key) != public_key {
            return Err(ConfigurationError::KeyPairMismatch);
        }

        let key_id = compute_key_id(&public_key);
        Ok(Self {
            keys: Arc::new(KeyPair {
                signing: SigningKey::<Sha256>::new(private_key),
                verifying: VerifyingKey::<Sha256>::new(public_key),
                key_id,
            }),
        })
    }

    /// Key identifier placed in the `kid` header of issued tokens
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.keys.key_id
    }

    /// Sign `message` with RSASSA-PKCS1-v1_5 / SHA-256
    ///
    /// # Errors
    ///
    /// Returns an error if the signing primitive fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, TokenError> {
        self.keys
            .signing
            .try_sign(message)
            .map(|signature| signature.to_vec())
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify an RS256 signature against the public key
    ///
    /// # Errors
    ///
    /// Returns `SignatureInvalid` if the signature is malformed or does not match.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), TokenError> {
        let signature =
            Signature::try_from(signature).map_err(|_| TokenError::SignatureInvalid)?;
        self.keys
            .verifying
            .verify(message, &signature)
            .map_err(|_| TokenError::SignatureInvalid)
    }
}

fn read_key_file(path: &Path) -> Result<String, ConfigurationError> {
    std::fs::read_to_string(path).map_err(|source| ConfigurationError::KeyFileUnreadable {
        path: path.display().to_string(),
        source,
    })
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, String> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|pkcs8_err| {
            RsaPrivateKey::from_pkcs1_pem(pem)
                .map_err(|pkcs1_err| format!("pkcs8: {pkcs8_err}; pkcs1: {pkcs1_err}"))
        })
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, String> {
    RsaPublicKey::from_public_key_pem(pem).or_else(|spki_err| {
        RsaPublicKey::from_pkcs1_pem(pem)
            .map_err(|pkcs1_err| format!("spki: {spki_err}; pkcs1: {pkcs1_err}"))
    })
}

// First 12 bytes of SHA-256 over the modulus, base64url
fn compute_key_id(public_key: &RsaPublicKey) -> String {
    let digest = Sha256::digest(public_key.n().to_bytes_be());
    general_purpose::URL_SAFE_NO_PAD.encode(&digest[..12])
}
