//! Shared fixtures for the engine tests: an in-memory backend, a device
//! identity backed by a memory store, and a TEE key pair with its provider
//! preset to the attested state.

use crate::api::signers::SignersApi;
use crate::api::{AuthData, RequestError};
use crate::attestation::{AttestationMode, AttestationVerifier};
use crate::crypto;
use crate::crypto::fpe::FpeCipher;
use crate::identity::IdentityKeyStore;
use crate::keys::UserKeyManager;
use crate::tee::TeeKeyProvider;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use framekey_core::env::Environment;
use framekey_core::store::MemoryStore;
use framekey_core::wire::{
    AttestationDoc, CompleteOnboardingRequest, EncryptedMasterKey, EncryptedUserKey,
    PublicKeyResponse, StartOnboardingRequest, UserKeyHash,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) fn auth() -> AuthData {
    AuthData {
        jwt: "jwt-test".into(),
        api_key: "sk_development_test".into(),
    }
}

/// In-memory stand-in for the signers backend.
#[derive(Default)]
pub(crate) struct TestBackend {
    master_key: Mutex<Option<EncryptedMasterKey>>,
    onboarding_response: Mutex<Option<EncryptedMasterKey>>,
    master_key_fetches: AtomicUsize,
    start_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl TestBackend {
    pub fn with_master_key(record: EncryptedMasterKey) -> Self {
        Self {
            master_key: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    pub fn master_key_fetches(&self) -> usize {
        self.master_key_fetches.load(Ordering::SeqCst)
    }

    pub fn master_key_for_tests(
        &self,
    ) -> parking_lot::MutexGuard<'_, Option<EncryptedMasterKey>> {
        self.master_key.lock()
    }

    pub fn onboarding_response_for_tests(
        &self,
    ) -> parking_lot::MutexGuard<'_, Option<EncryptedMasterKey>> {
        self.onboarding_response.lock()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    fn not_found(path: &str) -> RequestError {
        RequestError::Http {
            status: 404,
            status_text: "Not Found".into(),
            url: format!("http://localhost:3000/api/v1/signers{path}"),
            body: None,
        }
    }
}

#[async_trait::async_trait]
impl SignersApi for TestBackend {
    async fn start_onboarding(
        &self,
        _auth: &AuthData,
        _signer_id: &str,
        request: &StartOnboardingRequest,
    ) -> Result<(), RequestError> {
        assert!(!request.auth_id.is_empty());
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn complete_onboarding(
        &self,
        _auth: &AuthData,
        _signer_id: &str,
        request: &CompleteOnboardingRequest,
    ) -> Result<EncryptedMasterKey, RequestError> {
        assert!(request.otp.chars().all(|c| c.is_ascii_digit()));
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.onboarding_response
            .lock()
            .clone()
            .inspect(|record| {
                *self.master_key.lock() = Some(record.clone());
            })
            .ok_or_else(|| Self::not_found("/complete-onboarding"))
    }

    async fn get_encrypted_master_key(
        &self,
        _auth: &AuthData,
        device_id: &str,
    ) -> Result<EncryptedMasterKey, RequestError> {
        self.master_key_fetches.fetch_add(1, Ordering::SeqCst);
        self.master_key
            .lock()
            .clone()
            .ok_or_else(|| Self::not_found(&format!("/{device_id}/encrypted-user-key")))
    }

    async fn get_attestation(&self) -> Result<AttestationDoc, RequestError> {
        Err(Self::not_found("/attestation"))
    }

    async fn get_public_key(&self) -> Result<PublicKeyResponse, RequestError> {
        Err(Self::not_found("/attestation/public-key"))
    }
}

/// A device identity plus a TEE key pair, preset as already attested.
pub(crate) struct Harness {
    pub identity: Arc<IdentityKeyStore>,
    pub tee_secret: p256::SecretKey,
    pub tee_public: p256::PublicKey,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(IdentityKeyStore::load_or_generate(store).await.unwrap());
        let tee_secret = p256::SecretKey::from_slice(&[0x51u8; 32]).unwrap();
        let tee_public = tee_secret.public_key();
        Self {
            identity,
            tee_secret,
            tee_public,
        }
    }

    pub fn tee_provider(&self, api: Arc<dyn SignersApi>) -> Arc<TeeKeyProvider> {
        let verifier =
            AttestationVerifier::new(AttestationMode::Verify, Environment::Development).unwrap();
        Arc::new(TeeKeyProvider::preset(verifier, api, self.tee_public))
    }

    pub fn key_manager(&self, api: Arc<TestBackend>) -> UserKeyManager {
        let api: Arc<dyn SignersApi> = api;
        UserKeyManager::new(api.clone(), self.identity.clone(), self.tee_provider(api))
    }

    /// The AES key both sides derive for the master secret wrapper and FPE.
    pub fn shared_key(&self) -> [u8; 32] {
        crypto::ecdh_aes256gcm_key(self.identity.p256_secret(), &self.tee_public)
    }

    pub fn fpe(&self) -> FpeCipher {
        FpeCipher::new(&self.shared_key(), None).unwrap()
    }

    /// Wraps a seed the way the backend does: AES-256-GCM under the shared
    /// key, SHA-256 integrity hash alongside.
    pub fn wrapped_record(&self, seed: &[u8; 32]) -> EncryptedMasterKey {
        let key = self.shared_key();
        let blob = crypto::aes256gcm_seal(&key, &[0x24u8; 12], seed);
        EncryptedMasterKey {
            device_id: self.identity.device_id().to_string(),
            signer_id: "signer-test".into(),
            encrypted_user_key: EncryptedUserKey {
                bytes: BASE64.encode(&blob),
                encoding: "base64".into(),
                encryption_public_key: BASE64.encode(crypto::sec1_bytes(&self.tee_public)),
            },
            user_key_hash: UserKeyHash {
                bytes: BASE64.encode(crypto::sha256(seed)),
                encoding: "base64".into(),
                algorithm: "SHA-256".into(),
            },
            signature: None,
            signing_public_key: None,
        }
    }
}
