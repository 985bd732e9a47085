//! Per-curve key derivation and signing from the recovered seed.
//!
//! Stateless: the seed comes in, a key or signature comes out. Ed25519
//! artifacts are base58 on the wire, secp256k1 artifacts hex, matching what
//! the chains each curve serves expect to see.

use framekey_core::codec::{self, Encoding};
use k256::ecdsa::signature::Signer;
use serde::{Deserialize, Serialize};

/// Curves the signer derives from the master seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ed25519,
    Secp256k1,
}

impl std::str::FromStr for KeyType {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(KeyType::Ed25519),
            "secp256k1" => Ok(KeyType::Secp256k1),
            other => Err(SigningError::UnsupportedKeyType(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("seed is not usable for this curve: {0}")]
    InvalidSeed(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// A signature together with its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveSignature {
    pub bytes: String,
    pub encoding: Encoding,
}

/// Derives the private key for a curve from the 32-byte seed.
///
/// Ed25519 yields the 64-byte expanded form `seed || verification key`;
/// secp256k1 uses the seed directly as its scalar.
pub fn derive_private_key(key_type: KeyType, seed: &[u8; 32]) -> Result<Vec<u8>, SigningError> {
    match key_type {
        KeyType::Ed25519 => {
            let signing_key = ed25519_consensus::SigningKey::from(*seed);
            let mut expanded = Vec::with_capacity(64);
            expanded.extend_from_slice(seed);
            expanded.extend_from_slice(signing_key.verification_key().as_bytes());
            Ok(expanded)
        }
        KeyType::Secp256k1 => {
            k256::ecdsa::SigningKey::from_slice(seed)
                .map_err(|err| SigningError::InvalidSeed(err.to_string()))?;
            Ok(seed.to_vec())
        }
    }
}

/// Derives the public key for a curve from the seed, in its wire encoding:
/// base58 for Ed25519, hex of the uncompressed SEC1 point for secp256k1.
pub fn derive_public_key(key_type: KeyType, seed: &[u8; 32]) -> Result<String, SigningError> {
    match key_type {
        KeyType::Ed25519 => {
            let signing_key = ed25519_consensus::SigningKey::from(*seed);
            Ok(codec::encode(
                signing_key.verification_key().as_bytes(),
                Encoding::Base58,
            ))
        }
        KeyType::Secp256k1 => {
            let signing_key = k256::ecdsa::SigningKey::from_slice(seed)
                .map_err(|err| SigningError::InvalidSeed(err.to_string()))?;
            let point = signing_key.verifying_key().to_encoded_point(false);
            Ok(codec::encode(point.as_bytes(), Encoding::Hex))
        }
    }
}

/// Signs a message under a private key produced by [`derive_private_key`].
pub fn sign(
    key_type: KeyType,
    private_key: &[u8],
    message: &[u8],
) -> Result<CurveSignature, SigningError> {
    match key_type {
        KeyType::Ed25519 => {
            let seed: [u8; 32] = private_key
                .get(..32)
                .and_then(|s| s.try_into().ok())
                .filter(|_| private_key.len() == 64)
                .ok_or_else(|| {
                    SigningError::InvalidPrivateKey("ed25519 key must be 64 bytes".into())
                })?;
            let signing_key = ed25519_consensus::SigningKey::from(seed);
            let signature = signing_key.sign(message);
            Ok(CurveSignature {
                bytes: codec::encode(&signature.to_bytes(), Encoding::Base58),
                encoding: Encoding::Base58,
            })
        }
        KeyType::Secp256k1 => {
            let signing_key = k256::ecdsa::SigningKey::from_slice(private_key)
                .map_err(|err| SigningError::InvalidPrivateKey(err.to_string()))?;
            let signature: k256::ecdsa::Signature = signing_key.sign(message);
            Ok(CurveSignature {
                bytes: codec::encode(&signature.to_bytes(), Encoding::Hex),
                encoding: Encoding::Hex,
            })
        }
    }
}
