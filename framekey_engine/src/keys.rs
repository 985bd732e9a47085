//! Master secret recovery.
//!
//! The backend holds the master secret wrapped under AES-256-GCM with the key
//! agreed between the device identity and the attested TEE key. Recovery is
//! fetch (or cache hit), optional legacy signature check, unwrap, and hash
//! verification. The plaintext seed lives only as long as the caller needs
//! it and is never persisted.

use crate::api::signers::SignersApi;
use crate::api::{AuthData, RecipientKeys, RequestError};
use crate::cache::SessionCache;
use crate::crypto;
use crate::crypto::CryptoError;
use crate::identity::IdentityKeyStore;
use crate::tee::TeeKeyProvider;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use framekey_core::wire::EncryptedMasterKey;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Width of the recovered master secret.
pub const MASTER_SECRET_LEN: usize = 32;

const RECORD_CACHE_KEY: &str = "encrypted-master-key";

#[derive(Debug, thiserror::Error)]
pub enum KeyRecoveryError {
    #[error("master secret hash mismatch")]
    HashMismatch,

    #[error("master secret record signature is invalid: {0}")]
    InvalidSignature(String),

    #[error("malformed master secret record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Api(#[from] RequestError),
}

/// Fetches, verifies and unwraps the encrypted master secret for this device.
pub struct UserKeyManager {
    api: Arc<dyn SignersApi>,
    identity: Arc<IdentityKeyStore>,
    tee: Arc<TeeKeyProvider>,
    cache: SessionCache,
}

impl UserKeyManager {
    pub fn new(
        api: Arc<dyn SignersApi>,
        identity: Arc<IdentityKeyStore>,
        tee: Arc<TeeKeyProvider>,
    ) -> Self {
        Self {
            api,
            identity,
            tee,
            cache: SessionCache::default(),
        }
    }

    /// Recovers the 32-byte master secret, or `None` when the backend has no
    /// record for this device yet.
    ///
    /// Backend errors (a 404 for an unenrolled device, transient failures)
    /// resolve to `None`; an integrity failure on a record we did obtain is a
    /// hard error.
    pub async fn try_get_master_secret(
        &self,
        auth: &AuthData,
    ) -> Result<Option<Zeroizing<[u8; MASTER_SECRET_LEN]>>, KeyRecoveryError> {
        let record = match self.cached_or_fetch(auth).await {
            Some(record) => record,
            None => return Ok(None),
        };
        self.recover(&record).await.map(Some)
    }

    /// Caches a record obtained out of band (the complete-onboarding
    /// response) so later calls skip the fetch.
    pub async fn store_record(&self, record: &EncryptedMasterKey) {
        self.cache.set(RECORD_CACHE_KEY, record, None).await;
    }

    async fn cached_or_fetch(&self, auth: &AuthData) -> Option<EncryptedMasterKey> {
        if let Some(record) = self.cache.get::<EncryptedMasterKey>(RECORD_CACHE_KEY).await {
            return Some(record);
        }
        match self
            .api
            .get_encrypted_master_key(auth, self.identity.device_id())
            .await
        {
            Ok(record) => {
                self.cache.set(RECORD_CACHE_KEY, &record, None).await;
                Some(record)
            }
            Err(err) => {
                log::debug!(error = err.to_string().as_str(); "no encrypted master key available");
                None
            }
        }
    }

    /// Unwraps a record into the master secret, enforcing the legacy
    /// signature when present and the integrity hash always.
    pub async fn recover(
        &self,
        record: &EncryptedMasterKey,
    ) -> Result<Zeroizing<[u8; MASTER_SECRET_LEN]>, KeyRecoveryError> {
        let blob = BASE64
            .decode(&record.encrypted_user_key.bytes)
            .map_err(|err| KeyRecoveryError::Malformed(format!("encryptedUserKey.bytes: {err}")))?;

        verify_legacy_signature(record, &blob)?;

        let tee_key = self.tee.recipient_p256_key().await.map_err(KeyRecoveryError::Api)?;
        let attested_b64 = BASE64.encode(crypto::sec1_bytes(&tee_key));
        if record.encrypted_user_key.encryption_public_key != attested_b64 {
            return Err(KeyRecoveryError::Malformed(
                "encryptionPublicKey is not the attested TEE key".into(),
            ));
        }

        let key = crypto::ecdh_aes256gcm_key(self.identity.p256_secret(), &tee_key);
        let plaintext = Zeroizing::new(crypto::aes256gcm_open(&key, &blob)?);

        if record.user_key_hash.algorithm != "SHA-256" {
            return Err(KeyRecoveryError::Malformed(format!(
                "unsupported userKeyHash algorithm {:?}",
                record.user_key_hash.algorithm
            )));
        }
        let expected = BASE64
            .decode(&record.user_key_hash.bytes)
            .map_err(|err| KeyRecoveryError::Malformed(format!("userKeyHash.bytes: {err}")))?;
        if !crypto::ct_eq(&crypto::sha256(&plaintext), &expected) {
            return Err(KeyRecoveryError::HashMismatch);
        }

        let seed: [u8; MASTER_SECRET_LEN] = plaintext.as_slice().try_into().map_err(|_| {
            KeyRecoveryError::Malformed(format!(
                "master secret must be {MASTER_SECRET_LEN} bytes, got {}",
                plaintext.len()
            ))
        })?;
        Ok(Zeroizing::new(seed))
    }
}

/// Verifies the retired signed record shape: ECDSA P-256 / SHA-256 over the
/// ciphertext under `signingPublicKey`. A record carrying a signature that
/// cannot be verified is refused; the field is never ignored.
fn verify_legacy_signature(
    record: &EncryptedMasterKey,
    ciphertext: &[u8],
) -> Result<(), KeyRecoveryError> {
    let signature_b64 = match &record.signature {
        Some(signature) => signature,
        None => return Ok(()),
    };
    let signing_key_b64 = record.signing_public_key.as_ref().ok_or_else(|| {
        KeyRecoveryError::InvalidSignature("signature present without signingPublicKey".into())
    })?;

    let key_bytes = BASE64
        .decode(signing_key_b64)
        .map_err(|err| KeyRecoveryError::InvalidSignature(format!("signingPublicKey: {err}")))?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
        .map_err(|err| KeyRecoveryError::InvalidSignature(format!("signingPublicKey: {err}")))?;

    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|err| KeyRecoveryError::InvalidSignature(format!("signature: {err}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .or_else(|_| Signature::from_der(&sig_bytes))
        .map_err(|err| KeyRecoveryError::InvalidSignature(format!("signature: {err}")))?;

    verifying_key
        .verify(ciphertext, &signature)
        .map_err(|_| KeyRecoveryError::InvalidSignature("verification failed".into()))
}
