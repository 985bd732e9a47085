//! Onboarding and signing handlers.
//!
//! Four handlers form the client-side state machine: `start-onboarding`,
//! `complete-onboarding`, `get-status` and `sign`. A device is `new-device`
//! until its master secret is recoverable, `ready` after. Every handler runs
//! under a wall-clock budget and every outcome is wrapped: successes in the
//! handler contract, failures as `{status: "error", error, code?}` with a
//! machine-readable code only for the closed set of recognized failures.

use crate::api::signers::SignersApi;
use crate::api::{AuthData, RecipientKeys, RequestError};
use crate::attestation::AttestationError;
use crate::crypto;
use crate::crypto::fpe::{FpeCipher, FpeError};
use crate::identity::IdentityKeyStore;
use crate::keys::{KeyRecoveryError, UserKeyManager};
use crate::signing::{self, CurveSignature, KeyType, SigningError};
use crate::tee::TeeKeyProvider;
use framekey_core::codec::{self, CodecError, Encoding};
use framekey_core::wire::{CompleteOnboardingRequest, EncryptionContext, StartOnboardingRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Wall-clock budget for one handler invocation.
pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

pub const REQUEST_START_ONBOARDING: &str = "request:start-onboarding";
pub const REQUEST_COMPLETE_ONBOARDING: &str = "request:complete-onboarding";
pub const REQUEST_GET_STATUS: &str = "request:get-status";
pub const REQUEST_SIGN: &str = "request:sign";

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler timed out")]
    Timeout,

    #[error("no master secret is recoverable for this device")]
    NotOnboarded,

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Recovery(#[from] KeyRecoveryError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Fpe(#[from] FpeError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("malformed request payload: {0}")]
    Payload(String),
}

impl HandlerError {
    /// Machine-readable code, populated only for the closed set of failures
    /// callers are expected to branch on.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            HandlerError::Recovery(KeyRecoveryError::HashMismatch) => Some("invalid-device-share"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOnboardingParams {
    pub auth_data: AuthData,
    pub signer_id: String,
    pub auth_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOnboardingParams {
    pub auth_data: AuthData,
    pub signer_id: String,
    pub onboarding_authentication: OtpAuthentication,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpAuthentication {
    pub encrypted_otp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStatusParams {
    pub auth_data: AuthData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignParams {
    pub auth_data: AuthData,
    pub key_type: String,
    pub bytes: String,
    pub encoding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeys {
    pub ed25519: String,
    pub secp256k1: String,
}

/// Status side of the handler contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SignerStatus {
    Ready {
        #[serde(rename = "publicKeys")]
        public_keys: PublicKeys,
    },
    NewDevice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResult {
    pub signature: CurveSignature,
    pub public_key: String,
}

/// The wired signer: identity, attested channel, backend and key recovery.
pub struct Signer {
    identity: Arc<IdentityKeyStore>,
    tee: Arc<TeeKeyProvider>,
    api: Arc<dyn SignersApi>,
    keys: Arc<UserKeyManager>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(
        identity: Arc<IdentityKeyStore>,
        tee: Arc<TeeKeyProvider>,
        api: Arc<dyn SignersApi>,
        keys: Arc<UserKeyManager>,
    ) -> Self {
        Self {
            identity,
            tee,
            api,
            keys,
        }
    }

    pub async fn handle_start_onboarding(
        &self,
        params: StartOnboardingParams,
    ) -> Result<SignerStatus, HandlerError> {
        self.bounded(async {
            if let Some(seed) = self.keys.try_get_master_secret(&params.auth_data).await? {
                return Ok(SignerStatus::Ready {
                    public_keys: public_keys(&seed)?,
                });
            }
            let request = StartOnboardingRequest {
                auth_id: params.auth_id.clone(),
                encryption_context: EncryptionContext {
                    public_key: self.identity.serialized_public_key(),
                },
                device_id: self.identity.device_id().to_string(),
            };
            self.api
                .start_onboarding(&params.auth_data, &params.signer_id, &request)
                .await?;
            Ok(SignerStatus::NewDevice)
        })
        .await
    }

    pub async fn handle_complete_onboarding(
        &self,
        params: CompleteOnboardingParams,
    ) -> Result<SignerStatus, HandlerError> {
        self.bounded(async {
            let otp = self
                .fpe_cipher()
                .await?
                .decrypt_digits(&params.onboarding_authentication.encrypted_otp)?;
            let request = CompleteOnboardingRequest {
                otp,
                public_key: self.identity.serialized_public_key(),
                device_id: self.identity.device_id().to_string(),
            };
            let record = self
                .api
                .complete_onboarding(&params.auth_data, &params.signer_id, &request)
                .await?;
            self.keys.store_record(&record).await;
            let seed = self.keys.recover(&record).await?;
            Ok(SignerStatus::Ready {
                public_keys: public_keys(&seed)?,
            })
        })
        .await
    }

    pub async fn handle_get_status(
        &self,
        params: GetStatusParams,
    ) -> Result<SignerStatus, HandlerError> {
        self.bounded(async {
            match self.keys.try_get_master_secret(&params.auth_data).await? {
                Some(seed) => Ok(SignerStatus::Ready {
                    public_keys: public_keys(&seed)?,
                }),
                None => Ok(SignerStatus::NewDevice),
            }
        })
        .await
    }

    pub async fn handle_sign(&self, params: SignParams) -> Result<SignResult, HandlerError> {
        self.bounded(async {
            let seed = self
                .keys
                .try_get_master_secret(&params.auth_data)
                .await?
                .ok_or(HandlerError::NotOnboarded)?;
            let key_type: KeyType = params.key_type.parse()?;
            let encoding: Encoding = params.encoding.parse()?;
            let message = codec::decode(&params.bytes, encoding)?;

            let private_key = signing::derive_private_key(key_type, &seed)?;
            let signature = signing::sign(key_type, &private_key, &message)?;
            let public_key = signing::derive_public_key(key_type, &seed)?;
            Ok(SignResult {
                signature,
                public_key,
            })
        })
        .await
    }

    /// Dispatches a host-shell request event to its handler and wraps the
    /// outcome for the paired `response:*` event.
    pub async fn dispatch(&self, event: &str, payload: serde_json::Value) -> (String, serde_json::Value) {
        let response_event = event
            .strip_prefix("request:")
            .map(|name| format!("response:{name}"))
            .unwrap_or_else(|| "response:error".to_string());
        let result = match event {
            REQUEST_START_ONBOARDING => match parse_params(payload) {
                Ok(params) => wrap(self.handle_start_onboarding(params).await),
                Err(err) => wrap::<SignerStatus>(Err(err)),
            },
            REQUEST_COMPLETE_ONBOARDING => match parse_params(payload) {
                Ok(params) => wrap(self.handle_complete_onboarding(params).await),
                Err(err) => wrap::<SignerStatus>(Err(err)),
            },
            REQUEST_GET_STATUS => match parse_params(payload) {
                Ok(params) => wrap(self.handle_get_status(params).await),
                Err(err) => wrap::<SignerStatus>(Err(err)),
            },
            REQUEST_SIGN => match parse_params(payload) {
                Ok(params) => wrap(self.handle_sign(params).await),
                Err(err) => wrap::<SignResult>(Err(err)),
            },
            unknown => wrap::<SignerStatus>(Err(HandlerError::Payload(format!(
                "unknown event {unknown:?}"
            )))),
        };
        (response_event, result)
    }

    /// FF1 cipher under the key agreed with the attested TEE.
    async fn fpe_cipher(&self) -> Result<FpeCipher, HandlerError> {
        let tee_key = self.tee.recipient_p256_key().await?;
        let key = crypto::ecdh_aes256gcm_key(self.identity.p256_secret(), &tee_key);
        Ok(FpeCipher::new(&key, None)?)
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, HandlerError>>,
    ) -> Result<T, HandlerError> {
        tokio::time::timeout(HANDLER_TIMEOUT, fut)
            .await
            .map_err(|_| HandlerError::Timeout)?
    }
}

fn public_keys(seed: &[u8; 32]) -> Result<PublicKeys, SigningError> {
    Ok(PublicKeys {
        ed25519: signing::derive_public_key(KeyType::Ed25519, seed)?,
        secp256k1: signing::derive_public_key(KeyType::Secp256k1, seed)?,
    })
}

fn parse_params<T: serde::de::DeserializeOwned>(
    payload: serde_json::Value,
) -> Result<T, HandlerError> {
    serde_json::from_value(payload).map_err(|err| HandlerError::Payload(err.to_string()))
}

/// Wraps a handler outcome into the response payload.
fn wrap<T: Serialize>(result: Result<T, HandlerError>) -> serde_json::Value {
    match result {
        Ok(value) => serde_json::to_value(value).unwrap_or_else(|err| {
            serde_json::json!({
                "status": "error",
                "error": format!("response serialization failed: {err}"),
            })
        }),
        Err(err) => {
            let mut value = serde_json::json!({
                "status": "error",
                "error": err.to_string(),
            });
            if let Some(code) = err.code() {
                value["code"] = serde_json::Value::String(code.to_string());
            }
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, Harness, TestBackend};

    struct Fixture {
        harness: Harness,
        api: Arc<TestBackend>,
        signer: Signer,
    }

    async fn fixture(api: TestBackend) -> Fixture {
        let harness = Harness::new().await;
        let api = Arc::new(api);
        let dyn_api: Arc<dyn crate::api::signers::SignersApi> = api.clone();
        let tee = harness.tee_provider(dyn_api.clone());
        let keys = Arc::new(UserKeyManager::new(
            dyn_api.clone(),
            harness.identity.clone(),
            tee.clone(),
        ));
        let signer = Signer::new(harness.identity.clone(), tee, dyn_api, keys);
        Fixture {
            harness,
            api,
            signer,
        }
    }

    #[tokio::test]
    async fn start_onboarding_on_a_new_device_enrolls_it() {
        let fx = fixture(TestBackend::default()).await;
        let status = fx
            .signer
            .handle_start_onboarding(StartOnboardingParams {
                auth_data: testutil::auth(),
                signer_id: "signer-test".into(),
                auth_id: "email:user@example.com".into(),
            })
            .await
            .unwrap();
        assert_eq!(status, SignerStatus::NewDevice);
        assert_eq!(fx.api.start_calls(), 1);
    }

    #[tokio::test]
    async fn start_onboarding_on_a_recovered_device_is_ready() {
        let fx = fixture(TestBackend::default()).await;
        let record = fx.harness.wrapped_record(&[5u8; 32]);
        *fx.api.master_key_for_tests() = Some(record);

        let status = fx
            .signer
            .handle_start_onboarding(StartOnboardingParams {
                auth_data: testutil::auth(),
                signer_id: "signer-test".into(),
                auth_id: "email:user@example.com".into(),
            })
            .await
            .unwrap();
        match status {
            SignerStatus::Ready { public_keys } => {
                assert!(!public_keys.ed25519.is_empty());
                assert!(public_keys.secp256k1.starts_with("04"));
            }
            other => panic!("expected ready, got {other:?}"),
        }
        assert_eq!(fx.api.start_calls(), 0);
    }

    #[tokio::test]
    async fn complete_onboarding_decrypts_the_otp_and_recovers_the_seed() {
        let fx = fixture(TestBackend::default()).await;
        let record = fx.harness.wrapped_record(&[6u8; 32]);
        *fx.api.onboarding_response_for_tests() = Some(record);

        let encrypted_otp = fx.harness.fpe().encrypt_digits("123456").unwrap();
        let status = fx
            .signer
            .handle_complete_onboarding(CompleteOnboardingParams {
                auth_data: testutil::auth(),
                signer_id: "signer-test".into(),
                onboarding_authentication: OtpAuthentication { encrypted_otp },
            })
            .await
            .unwrap();
        assert!(matches!(status, SignerStatus::Ready { .. }));
        assert_eq!(fx.api.complete_calls(), 1);

        // the record landed in the key manager cache; no further fetches
        let status = fx
            .signer
            .handle_get_status(GetStatusParams {
                auth_data: testutil::auth(),
            })
            .await
            .unwrap();
        assert!(matches!(status, SignerStatus::Ready { .. }));
        assert_eq!(fx.api.master_key_fetches(), 0);
    }

    #[tokio::test]
    async fn get_status_reports_new_device_without_a_record() {
        let fx = fixture(TestBackend::default()).await;
        let status = fx
            .signer
            .handle_get_status(GetStatusParams {
                auth_data: testutil::auth(),
            })
            .await
            .unwrap();
        assert_eq!(status, SignerStatus::NewDevice);
    }

    #[tokio::test]
    async fn sign_produces_a_signature_and_matching_public_key() {
        let fx = fixture(TestBackend::default()).await;
        let record = fx.harness.wrapped_record(&[8u8; 32]);
        *fx.api.master_key_for_tests() = Some(record);

        let result = fx
            .signer
            .handle_sign(SignParams {
                auth_data: testutil::auth(),
                key_type: "ed25519".into(),
                bytes: hex::encode(b"message"),
                encoding: "hex".into(),
            })
            .await
            .unwrap();
        assert_eq!(result.signature.encoding, Encoding::Base58);
        assert_eq!(
            result.public_key,
            signing::derive_public_key(KeyType::Ed25519, &[8u8; 32]).unwrap()
        );
    }

    #[tokio::test]
    async fn sign_without_a_master_secret_is_an_error() {
        let fx = fixture(TestBackend::default()).await;
        let err = fx
            .signer
            .handle_sign(SignParams {
                auth_data: testutil::auth(),
                key_type: "ed25519".into(),
                bytes: "00".into(),
                encoding: "hex".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotOnboarded));
    }

    #[tokio::test]
    async fn sign_rejects_unknown_key_types() {
        let fx = fixture(TestBackend::default()).await;
        let record = fx.harness.wrapped_record(&[8u8; 32]);
        *fx.api.master_key_for_tests() = Some(record);

        let err = fx
            .signer
            .handle_sign(SignParams {
                auth_data: testutil::auth(),
                key_type: "p384".into(),
                bytes: "00".into(),
                encoding: "hex".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Signing(SigningError::UnsupportedKeyType(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_wraps_errors_with_the_known_code() {
        let fx = fixture(TestBackend::default()).await;
        let mut record = fx.harness.wrapped_record(&[8u8; 32]);
        // corrupt the integrity hash
        record.user_key_hash.bytes = {
            use base64::Engine;
            let engine = &base64::engine::general_purpose::STANDARD;
            let mut hash = engine.decode(&record.user_key_hash.bytes).unwrap();
            hash[0] ^= 1;
            engine.encode(&hash)
        };
        *fx.api.master_key_for_tests() = Some(record);

        let (event, payload) = fx
            .signer
            .dispatch(
                REQUEST_GET_STATUS,
                serde_json::json!({"authData": {"jwt": "j", "apiKey": "k"}}),
            )
            .await;
        assert_eq!(event, "response:get-status");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["code"], "invalid-device-share");
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_events_and_bad_payloads() {
        let fx = fixture(TestBackend::default()).await;

        let (event, payload) = fx
            .signer
            .dispatch("request:reboot", serde_json::json!({}))
            .await;
        assert_eq!(event, "response:reboot");
        assert_eq!(payload["status"], "error");
        assert!(payload.get("code").is_none());

        let (_, payload) = fx
            .signer
            .dispatch(REQUEST_SIGN, serde_json::json!({"bytes": "00"}))
            .await;
        assert_eq!(payload["status"], "error");
    }

    #[tokio::test]
    async fn successful_status_serializes_to_the_contract() {
        let fx = fixture(TestBackend::default()).await;
        let record = fx.harness.wrapped_record(&[4u8; 32]);
        *fx.api.master_key_for_tests() = Some(record);

        let (event, payload) = fx
            .signer
            .dispatch(
                REQUEST_GET_STATUS,
                serde_json::json!({"authData": {"jwt": "j", "apiKey": "k"}}),
            )
            .await;
        assert_eq!(event, "response:get-status");
        assert_eq!(payload["status"], "ready");
        assert!(payload["publicKeys"]["ed25519"].is_string());
        assert!(payload["publicKeys"]["secp256k1"].is_string());
    }
}
