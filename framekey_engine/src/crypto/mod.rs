//! Cryptographic primitives shared across the engine.
//!
//! Digests, the raw ECDH derivation that produces the master-secret
//! unwrapping key, AES-256-GCM in the `IV || ciphertext || tag` layout used
//! on the wire, and SPKI helpers for the device identity.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256, Sha384, Sha512};
use spki::{DecodePublicKey, EncodePublicKey};
use subtle::ConstantTimeEq;

pub mod fpe;
pub mod hpke;

/// AES-GCM nonce length on the wire.
pub const GCM_IV_LEN: usize = 12;
/// AES-GCM authentication tag length.
pub const GCM_TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext shorter than IV and tag")]
    TruncatedCiphertext,

    #[error("AES-GCM open failed")]
    AeadOpen,

    #[error("invalid public key: {0}")]
    InvalidKey(String),
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn sha384(data: &[u8]) -> [u8; 48] {
    Sha384::digest(data).into()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    Sha512::digest(data).into()
}

/// Constant-time equality for digests and key material.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Derives the AES-256-GCM key shared with the TEE.
///
/// Raw ECDH over P-256; the x coordinate of the shared point is the key,
/// matching `deriveKey(ECDH -> AES-GCM-256)` on the peer side. The key has a
/// single purpose: unwrapping the master secret and keying FF1.
pub fn ecdh_aes256gcm_key(secret: &p256::SecretKey, public: &p256::PublicKey) -> [u8; 32] {
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut key = [0u8; 32];
    key.copy_from_slice(shared.raw_secret_bytes());
    key
}

/// Opens an AES-256-GCM blob laid out as `IV(12) || ciphertext || tag(16)`.
pub fn aes256gcm_open(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < GCM_IV_LEN + GCM_TAG_LEN {
        return Err(CryptoError::TruncatedCiphertext);
    }
    let (iv, ciphertext) = blob.split_at(GCM_IV_LEN);
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::AeadOpen)
}

/// Seals a plaintext into the wire layout `IV(12) || ciphertext || tag(16)`.
pub fn aes256gcm_seal(key: &[u8; 32], iv: &[u8; GCM_IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(key.into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .expect("AES-GCM seal is infallible for in-memory buffers");
    let mut blob = Vec::with_capacity(GCM_IV_LEN + ciphertext.len());
    blob.extend_from_slice(iv);
    blob.extend_from_slice(&ciphertext);
    blob
}

/// DER-encoded SubjectPublicKeyInfo of a P-256 public key.
pub fn spki_der(public: &p256::PublicKey) -> Result<Vec<u8>, CryptoError> {
    public
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|err| CryptoError::InvalidKey(err.to_string()))
}

pub fn public_key_from_spki_der(der: &[u8]) -> Result<p256::PublicKey, CryptoError> {
    p256::PublicKey::from_public_key_der(der)
        .map_err(|err| CryptoError::InvalidKey(err.to_string()))
}

/// Parses a P-256 public key from SEC1 bytes (compressed or uncompressed).
pub fn public_key_from_sec1(bytes: &[u8]) -> Result<p256::PublicKey, CryptoError> {
    p256::PublicKey::from_sec1_bytes(bytes)
        .map_err(|err| CryptoError::InvalidKey(err.to_string()))
}

/// Uncompressed SEC1 form of a P-256 public key, the KEM serialization used
/// on the wire.
pub fn sec1_bytes(public: &p256::PublicKey) -> Vec<u8> {
    public.to_encoded_point(false).as_bytes().to_vec()
}
