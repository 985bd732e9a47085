//! Framekey custody engine.
//!
//! The engine runs inside an isolated frame on the user's device and mediates
//! between the authenticated session, the remote TEE holding the canonical
//! master secret, and the host application requesting signatures. Nothing
//! sensitive is exchanged before the TEE peer proves, through remote
//! attestation, that it is the expected application on genuine hardware.
//!
//! [`SignerBuilder`] wires the services in their one-way initialization
//! order: persistent key store, device identity, attestation verifier, HPKE
//! channel, user key manager, curve key service.

use std::sync::Arc;

pub mod api;
pub mod attestation;
pub mod cache;
pub mod crypto;
pub mod identity;
pub mod keys;
pub mod onboarding;
pub mod signing;
pub mod tee;

#[cfg(test)]
pub(crate) mod testutil;

use api::RequestExecutor;
use api::signers::{SignersApi, SignersClient};
use attestation::{AttestationMode, AttestationVerifier};
use framekey_core::BoxError;
use framekey_core::backoff::RetryConfig;
use framekey_core::env::parse_api_key;
use framekey_core::store::{KeyValueStore, MemoryStore};
use identity::IdentityKeyStore;
use keys::UserKeyManager;
use onboarding::Signer;
use tee::TeeKeyProvider;

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Builder for a fully wired [`Signer`].
pub struct SignerBuilder {
    api_key: String,
    store: Option<Arc<dyn KeyValueStore>>,
    app_identifier: Option<String>,
    attestation_mode: AttestationMode,
    retry: RetryConfig,
}

impl SignerBuilder {
    /// Starts a builder from the host-supplied API key; the deployment
    /// environment is derived from it and never configured separately.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            store: None,
            app_identifier: None,
            attestation_mode: AttestationMode::Verify,
            retry: RetryConfig::default(),
        }
    }

    /// Durable storage for the device identity key pair. Without one, the
    /// identity lives only as long as the process.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_app_identifier(mut self, app_identifier: impl Into<String>) -> Self {
        self.app_identifier = Some(app_identifier.into());
        self
    }

    /// Attestation mode. [`AttestationMode::Bypass`] is refused outside
    /// development and staging.
    pub fn with_attestation_mode(mut self, mode: AttestationMode) -> Self {
        self.attestation_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn build(self) -> Result<Signer, BoxError> {
        let api_key = parse_api_key(&self.api_key)?;
        let environment = api_key.environment;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let identity = Arc::new(IdentityKeyStore::load_or_generate(store).await?);

        let verifier = AttestationVerifier::new(self.attestation_mode, environment)?;
        let plain_executor = RequestExecutor::new(environment, self.app_identifier.clone())
            .with_retry(self.retry.clone());
        let tee = Arc::new(TeeKeyProvider::new(
            verifier,
            Arc::new(SignersClient::new(plain_executor)),
        ));

        let channel = Arc::new(identity.channel());
        let executor = RequestExecutor::new(environment, self.app_identifier)
            .with_retry(self.retry)
            .with_encryption(channel, tee.clone());
        let api: Arc<dyn SignersApi> = Arc::new(SignersClient::new(executor));

        let keys = Arc::new(UserKeyManager::new(
            api.clone(),
            identity.clone(),
            tee.clone(),
        ));
        Ok(Signer::new(identity, tee, api, keys))
    }
}
