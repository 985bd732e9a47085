//! Typed endpoints of the signers API.
//!
//! Each operation fixes its method, path, encryption flag and schemas over
//! the request executor. Onboarding operations are scoped by signer id in the
//! URL; the encrypted master key lookup is scoped by device id.

use super::{ApiBody, AuthData, RequestError, RequestExecutor, RequestSpec};
use framekey_core::codec::is_base64;
use framekey_core::wire::{
    AckResponse, AttestationDoc, CompleteOnboardingRequest, EncryptedMasterKey, PublicKeyResponse,
    StartOnboardingRequest,
};

/// The remote operations the engine depends on. Concrete transport lives in
/// [`SignersClient`]; tests substitute their own implementation.
#[async_trait::async_trait]
pub trait SignersApi: Send + Sync {
    async fn start_onboarding(
        &self,
        auth: &AuthData,
        signer_id: &str,
        request: &StartOnboardingRequest,
    ) -> Result<(), RequestError>;

    async fn complete_onboarding(
        &self,
        auth: &AuthData,
        signer_id: &str,
        request: &CompleteOnboardingRequest,
    ) -> Result<EncryptedMasterKey, RequestError>;

    async fn get_encrypted_master_key(
        &self,
        auth: &AuthData,
        device_id: &str,
    ) -> Result<EncryptedMasterKey, RequestError>;

    async fn get_attestation(&self) -> Result<AttestationDoc, RequestError>;

    async fn get_public_key(&self) -> Result<PublicKeyResponse, RequestError>;
}

/// HTTP-backed [`SignersApi`] over a [`RequestExecutor`].
pub struct SignersClient {
    executor: RequestExecutor,
}

impl SignersClient {
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait::async_trait]
impl SignersApi for SignersClient {
    async fn start_onboarding(
        &self,
        auth: &AuthData,
        signer_id: &str,
        request: &StartOnboardingRequest,
    ) -> Result<(), RequestError> {
        let spec = RequestSpec {
            method: http::Method::POST,
            path: format!("/{signer_id}/start-onboarding"),
            encrypted: false,
            auth: Some(auth.clone()),
        };
        let _: AckResponse = self.executor.execute(spec, Some(request)).await?;
        Ok(())
    }

    async fn complete_onboarding(
        &self,
        auth: &AuthData,
        signer_id: &str,
        request: &CompleteOnboardingRequest,
    ) -> Result<EncryptedMasterKey, RequestError> {
        let spec = RequestSpec {
            method: http::Method::POST,
            path: format!("/{signer_id}/complete-onboarding"),
            encrypted: true,
            auth: Some(auth.clone()),
        };
        self.executor.execute(spec, Some(request)).await
    }

    async fn get_encrypted_master_key(
        &self,
        auth: &AuthData,
        device_id: &str,
    ) -> Result<EncryptedMasterKey, RequestError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            path: format!("/{device_id}/encrypted-user-key"),
            encrypted: false,
            auth: Some(auth.clone()),
        };
        self.executor.execute::<(), _>(spec, None).await
    }

    async fn get_attestation(&self) -> Result<AttestationDoc, RequestError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            path: "/attestation".into(),
            encrypted: false,
            auth: None,
        };
        self.executor.execute::<(), _>(spec, None).await
    }

    async fn get_public_key(&self) -> Result<PublicKeyResponse, RequestError> {
        let spec = RequestSpec {
            method: http::Method::GET,
            path: "/attestation/public-key".into(),
            encrypted: false,
            auth: None,
        };
        self.executor.execute::<(), _>(spec, None).await
    }
}

impl ApiBody for StartOnboardingRequest {
    fn validate(&self) -> Result<(), String> {
        if self.auth_id.is_empty() {
            return Err("authId must not be empty".into());
        }
        if !is_base64(&self.encryption_context.public_key) {
            return Err("encryptionContext.publicKey is not valid base64".into());
        }
        validate_device_id(&self.device_id)
    }
}

impl ApiBody for CompleteOnboardingRequest {
    fn validate(&self) -> Result<(), String> {
        if self.otp.is_empty() || !self.otp.chars().all(|c| c.is_ascii_digit()) {
            return Err("otp must be a non-empty digit string".into());
        }
        if !is_base64(&self.public_key) {
            return Err("publicKey is not valid base64".into());
        }
        validate_device_id(&self.device_id)
    }
}

fn validate_device_id(device_id: &str) -> Result<(), String> {
    if device_id.len() == 64 && device_id.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err("deviceId must be 64 hex characters".into())
    }
}
