//! TEE key provider.
//!
//! Hands out the attested TEE public key as a usable key handle, fetching
//! and verifying the attestation envelope on first use. In bypass mode the
//! key comes from the backend unverified; that path is explicit, logged and
//! refused in production at construction time.

use crate::api::signers::SignersApi;
use crate::api::{RecipientKeys, RequestError};
use crate::attestation::{AttestationError, AttestationMode, AttestationVerifier};
use crate::crypto;
use crate::crypto::hpke::{self, KemPublicKey};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Resolves and caches the attested TEE public key.
///
/// The verifier holds the write-once key state; this type adds the fetch
/// path and serializes concurrent first uses so the envelope is verified at
/// most once per session.
pub struct TeeKeyProvider {
    verifier: AttestationVerifier,
    api: Arc<dyn SignersApi>,
    fetch_lock: Mutex<()>,
}

impl TeeKeyProvider {
    pub fn new(verifier: AttestationVerifier, api: Arc<dyn SignersApi>) -> Self {
        Self {
            verifier,
            api,
            fetch_lock: Mutex::new(()),
        }
    }

    /// The attested TEE public key, verifying the attestation envelope on
    /// first use.
    pub async fn public_key(&self) -> Result<p256::PublicKey, RequestError> {
        if let Ok(key) = self.verifier.attested_public_key() {
            return Ok(key);
        }
        let _guard = self.fetch_lock.lock().await;
        if let Ok(key) = self.verifier.attested_public_key() {
            return Ok(key);
        }

        match self.verifier.mode() {
            AttestationMode::Verify => {
                let doc = self.api.get_attestation().await?;
                Ok(self.verifier.verify(&doc).await?)
            }
            AttestationMode::Bypass => {
                let response = self.api.get_public_key().await?;
                let bytes = BASE64.decode(&response.public_key).map_err(|_| {
                    RequestError::Attestation(AttestationError::PublicKeyNotAttested)
                })?;
                let key = crypto::public_key_from_sec1(&bytes).map_err(|_| {
                    RequestError::Attestation(AttestationError::PublicKeyNotAttested)
                })?;
                self.verifier.accept_unverified(key)?;
                Ok(key)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn preset(verifier: AttestationVerifier, api: Arc<dyn SignersApi>, key: p256::PublicKey) -> Self {
        let provider = Self::new(verifier, api);
        *provider.verifier.attested_key_for_tests() = Some(key);
        provider
    }
}

#[async_trait::async_trait]
impl RecipientKeys for TeeKeyProvider {
    async fn recipient_kem_key(&self) -> Result<KemPublicKey, RequestError> {
        let key = self.public_key().await?;
        hpke::kem_public_key(&crypto::sec1_bytes(&key))
            .map_err(|err| RequestError::Encryption(err.to_string()))
    }

    async fn recipient_p256_key(&self) -> Result<p256::PublicKey, RequestError> {
        self.public_key().await
    }
}
