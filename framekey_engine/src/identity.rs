//! Device identity: a long-lived client ECDH key pair and the identifier
//! derived from it.
//!
//! The key pair is generated once per install and persisted through the host
//! key-value adapter as PKCS#8 DER. The device identifier is
//! `hex(SHA-256(SPKI))` of the public key, so it is a pure function of the
//! key pair and stable for as long as the host keeps the entry.

use crate::crypto;
use crate::crypto::hpke::{self, KemPrivateKey, KemPublicKey, SecureChannel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use framekey_core::store::{
    ENCRYPTION_KEYS_BUCKET, IDENTITY_KEY_PAIR_KEY, KeyValueStore, StorageError,
};
use ::hpke::Serializable;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("persisted identity key pair is malformed: {0}")]
    Malformed(String),
}

/// The persistent client identity key pair and everything derived from it.
pub struct IdentityKeyStore {
    store: Arc<dyn KeyValueStore>,
    p256_secret: p256::SecretKey,
    p256_public: p256::PublicKey,
    kem_secret: KemPrivateKey,
    kem_public: KemPublicKey,
    device_id: String,
}

impl IdentityKeyStore {
    /// Loads the identity key pair from the adapter, generating and
    /// persisting a fresh one when none exists. A present-but-unreadable
    /// entry is an error, never a silent regeneration.
    pub async fn load_or_generate(store: Arc<dyn KeyValueStore>) -> Result<Self, IdentityError> {
        let p256_secret = match store
            .get(ENCRYPTION_KEYS_BUCKET, IDENTITY_KEY_PAIR_KEY)
            .await?
        {
            Some(der) => p256::SecretKey::from_pkcs8_der(&der)
                .map_err(|err| IdentityError::Malformed(err.to_string()))?,
            None => {
                let (kem_secret, _) = hpke::generate_key_pair();
                let secret = p256::SecretKey::from_slice(&kem_secret.to_bytes())
                    .map_err(|err| IdentityError::Malformed(err.to_string()))?;
                let der = secret
                    .to_pkcs8_der()
                    .map_err(|err| IdentityError::Malformed(err.to_string()))?;
                store
                    .set(
                        ENCRYPTION_KEYS_BUCKET,
                        IDENTITY_KEY_PAIR_KEY,
                        der.as_bytes().to_vec(),
                        None,
                    )
                    .await?;
                log::info!("generated a new device identity key pair");
                secret
            }
        };

        let p256_public = p256_secret.public_key();
        let kem_secret = hpke::kem_private_key(&p256_secret.to_bytes())
            .map_err(|err| IdentityError::Malformed(err.to_string()))?;
        let kem_public = hpke::kem_public_key(&crypto::sec1_bytes(&p256_public))
            .map_err(|err| IdentityError::Malformed(err.to_string()))?;
        let spki = crypto::spki_der(&p256_public)
            .map_err(|err| IdentityError::Malformed(err.to_string()))?;
        let device_id = hex::encode(crypto::sha256(&spki));

        Ok(Self {
            store,
            p256_secret,
            p256_public,
            kem_secret,
            kem_public,
            device_id,
        })
    }

    /// The device identifier: `hex(SHA-256(SPKI(public key)))`.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Base64 of the KEM-serialized (uncompressed SEC1) public key, the form
    /// advertised to the backend.
    pub fn serialized_public_key(&self) -> String {
        BASE64.encode(crypto::sec1_bytes(&self.p256_public))
    }

    pub fn p256_secret(&self) -> &p256::SecretKey {
        &self.p256_secret
    }

    pub fn p256_public(&self) -> &p256::PublicKey {
        &self.p256_public
    }

    pub fn kem_public(&self) -> &KemPublicKey {
        &self.kem_public
    }

    /// A secure channel speaking as this device identity.
    pub fn channel(&self) -> SecureChannel {
        SecureChannel::new(self.kem_secret.clone(), self.kem_public.clone())
    }

    /// Removes the persisted key pair. The running instance keeps its keys;
    /// the next load will generate a fresh identity.
    pub async fn clear(&self) -> Result<(), IdentityError> {
        self.store
            .delete(ENCRYPTION_KEYS_BUCKET, IDENTITY_KEY_PAIR_KEY)
            .await?;
        Ok(())
    }
}
