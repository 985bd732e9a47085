//! HTTP request pipeline to the signer backend.
//!
//! Every call goes through [`RequestExecutor::execute`]: validate the input,
//! build the URL and headers, optionally seal the body for the attested TEE,
//! send with bounded jittered retry, and strictly decode (and, for encrypted
//! endpoints, open) the response. Retries never mutate the payload; a
//! `Retry-After` header from the backend overrides the computed delay.

use crate::APP_USER_AGENT;
use crate::attestation::AttestationError;
use crate::crypto::hpke::{KemPublicKey, SecureChannel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use framekey_core::backoff::{RetryConfig, next_delay, should_retry};
use framekey_core::env::Environment;
use framekey_core::wire::EncryptedEnvelope;
use http::header;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

pub mod signers;

/// Path prefix of every signers endpoint.
pub const API_PREFIX: &str = "/api/v1/signers";

const APP_IDENTIFIER_HEADER: &str = "x-app-identifier";
const API_KEY_HEADER: &str = "x-api-key";

/// Bearer credentials for authenticated endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub jwt: String,
    pub api_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("input schema violation: {0}")]
    InputSchemaViolation(String),

    #[error("output schema violation: {0}")]
    OutputSchemaViolation(String),

    #[error("HTTP {status} {status_text} at {url}")]
    Http {
        status: u16,
        status_text: String,
        url: String,
        body: Option<serde_json::Value>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel encryption failed: {0}")]
    Encryption(String),

    #[error(transparent)]
    Attestation(#[from] AttestationError),
}

/// Request bodies validate themselves before anything is sent.
pub trait ApiBody: Serialize {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Bodiless requests.
impl ApiBody for () {}

/// Provider of the attested TEE public key, the recipient of sealed bodies
/// and the required sender of encrypted responses.
#[async_trait::async_trait]
pub trait RecipientKeys: Send + Sync {
    async fn recipient_kem_key(&self) -> Result<KemPublicKey, RequestError>;
    async fn recipient_p256_key(&self) -> Result<p256::PublicKey, RequestError>;
}

/// Everything fixed about one endpoint call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: http::Method,
    pub path: String,
    pub encrypted: bool,
    pub auth: Option<AuthData>,
}

pub struct RequestExecutor {
    http: reqwest::Client,
    base_url: String,
    app_identifier: Option<String>,
    retry: RetryConfig,
    channel: Option<Arc<SecureChannel>>,
    recipient: Option<Arc<dyn RecipientKeys>>,
}

impl RequestExecutor {
    pub fn new(environment: Environment, app_identifier: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .http2_keep_alive_interval(Some(Duration::from_secs(25)))
            .http2_keep_alive_timeout(Duration::from_secs(15))
            .http2_keep_alive_while_idle(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(20))
            .user_agent(APP_USER_AGENT)
            .build()
            .expect("Framekey reqwest client should build");
        Self {
            http,
            base_url: environment.base_url().to_string(),
            app_identifier,
            retry: RetryConfig::default(),
            channel: None,
            recipient: None,
        }
    }

    /// Enables encrypted endpoints by wiring the client channel and the
    /// attested recipient key source.
    pub fn with_encryption(
        mut self,
        channel: Arc<SecureChannel>,
        recipient: Arc<dyn RecipientKeys>,
    ) -> Self {
        self.channel = Some(channel);
        self.recipient = Some(recipient);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn channel(&self) -> Result<&SecureChannel, RequestError> {
        self.channel
            .as_deref()
            .ok_or_else(|| RequestError::Encryption("no client channel configured".into()))
    }

    fn recipient(&self) -> Result<&dyn RecipientKeys, RequestError> {
        self.recipient
            .as_deref()
            .ok_or_else(|| RequestError::Encryption("no recipient key source configured".into()))
    }

    /// Runs the full request pipeline for one endpoint.
    pub async fn execute<I, O>(&self, spec: RequestSpec, body: Option<&I>) -> Result<O, RequestError>
    where
        I: ApiBody,
        O: DeserializeOwned,
    {
        if let Some(body) = body {
            body.validate().map_err(RequestError::InputSchemaViolation)?;
        }
        let url = format!("{}{}{}", self.base_url, API_PREFIX, spec.path);

        let body_bytes = match body {
            Some(body) if spec.encrypted => Some(self.seal_body(body).await?),
            Some(body) => Some(
                serde_json::to_vec(body)
                    .map_err(|err| RequestError::InputSchemaViolation(err.to_string()))?,
            ),
            None => None,
        };

        let response = self.send_with_retry(&spec, &url, body_bytes).await?;
        let data = response
            .bytes()
            .await
            .map_err(|err| RequestError::Transport(err.to_string()))?;

        if spec.encrypted {
            self.open_response(&data).await
        } else {
            serde_json::from_slice(&data)
                .map_err(|err| RequestError::OutputSchemaViolation(err.to_string()))
        }
    }

    async fn seal_body<I: ApiBody>(&self, body: &I) -> Result<Vec<u8>, RequestError> {
        let recipient_key = self.recipient()?.recipient_kem_key().await?;
        let sealed = self
            .channel()?
            .seal(&recipient_key, body)
            .map_err(|err| RequestError::Encryption(err.to_string()))?;
        let envelope = EncryptedEnvelope {
            ciphertext: BASE64.encode(&sealed.ciphertext),
            encapsulated_key: BASE64.encode(&sealed.encapsulated_key),
            public_key: BASE64.encode(&sealed.sender_public_key),
        };
        serde_json::to_vec(&envelope).map_err(|err| RequestError::Encryption(err.to_string()))
    }

    async fn open_response<O: DeserializeOwned>(&self, data: &[u8]) -> Result<O, RequestError> {
        let envelope: EncryptedEnvelope = serde_json::from_slice(data)
            .map_err(|err| RequestError::OutputSchemaViolation(err.to_string()))?;
        envelope
            .validate()
            .map_err(RequestError::OutputSchemaViolation)?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|err| RequestError::OutputSchemaViolation(err.to_string()))?;
        let encapsulated_key = BASE64
            .decode(&envelope.encapsulated_key)
            .map_err(|err| RequestError::OutputSchemaViolation(err.to_string()))?;

        let sender = self.recipient()?.recipient_kem_key().await?;
        self.channel()?
            .open(&sender, &ciphertext, &encapsulated_key)
            .map_err(|err| RequestError::Encryption(err.to_string()))
    }

    /// Bounded retry: transport failures and retryable statuses sleep and go
    /// again with an identical payload, everything else is terminal.
    async fn send_with_retry(
        &self,
        spec: &RequestSpec,
        url: &str,
        body_bytes: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, RequestError> {
        let mut retry_count = 0u32;
        loop {
            let mut req = self
                .http
                .request(spec.method.clone(), url)
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(app) = &self.app_identifier {
                req = req.header(APP_IDENTIFIER_HEADER, app);
            }
            if let Some(auth) = &spec.auth {
                req = req
                    .header(header::AUTHORIZATION, format!("Bearer {}", auth.jwt))
                    .header(API_KEY_HEADER, &auth.api_key);
            }
            if let Some(bytes) = &body_bytes {
                req = req.body(bytes.clone());
            }

            match req.send().await {
                Ok(res) if res.status().is_success() => return Ok(res),
                Ok(res) => {
                    let status = res.status().as_u16();
                    if should_retry(status, retry_count, &self.retry) {
                        let retry_after = res
                            .headers()
                            .get(header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                        let delay = next_delay(retry_count, &self.retry, retry_after.as_deref());
                        log::debug!(
                            status = status, retry_count = retry_count, delay_ms = delay;
                            "retrying signer request"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        retry_count += 1;
                        continue;
                    }
                    let status_text = res
                        .status()
                        .canonical_reason()
                        .unwrap_or_default()
                        .to_string();
                    let body = res
                        .bytes()
                        .await
                        .ok()
                        .and_then(|b| serde_json::from_slice(&b).ok());
                    return Err(RequestError::Http {
                        status,
                        status_text,
                        url: url.to_string(),
                        body,
                    });
                }
                Err(err) => {
                    if retry_count < self.retry.max_retries {
                        let delay = next_delay(retry_count, &self.retry, None);
                        log::debug!(
                            error = err.to_string().as_str(), retry_count = retry_count;
                            "retrying signer request after transport error"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        retry_count += 1;
                        continue;
                    }
                    return Err(RequestError::Transport(err.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Health {
        ok: bool,
    }

    fn executor(base_url: &str, retry: RetryConfig) -> RequestExecutor {
        RequestExecutor::new(Environment::Development, Some("test-app".into()))
            .with_base_url(base_url)
            .with_retry(retry)
    }

    fn quick_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn plain_get_decodes_the_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/signers/health")
                    .header("x-app-identifier", "test-app");
                then.status(200).json_body(serde_json::json!({"ok": true}));
            })
            .await;

        let executor = executor(&server.base_url(), quick_retry(3));
        let spec = RequestSpec {
            method: http::Method::GET,
            path: "/health".into(),
            encrypted: false,
            auth: None,
        };
        let health: Health = executor.execute::<(), _>(spec, None).await.unwrap();
        assert_eq!(health, Health { ok: true });
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn auth_headers_are_attached() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/signers/health")
                    .header("authorization", "Bearer jwt-123")
                    .header("x-api-key", "sk_development_abc");
                then.status(200).json_body(serde_json::json!({"ok": true}));
            })
            .await;

        let executor = executor(&server.base_url(), quick_retry(3));
        let spec = RequestSpec {
            method: http::Method::GET,
            path: "/health".into(),
            encrypted: false,
            auth: Some(AuthData {
                jwt: "jwt-123".into(),
                api_key: "sk_development_abc".into(),
            }),
        };
        let _: Health = executor.execute::<(), _>(spec, None).await.unwrap();
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn non_retryable_status_maps_to_http_error_with_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/signers/health");
                then.status(404)
                    .json_body(serde_json::json!({"message": "unknown signer"}));
            })
            .await;

        let executor = executor(&server.base_url(), quick_retry(3));
        let spec = RequestSpec {
            method: http::Method::GET,
            path: "/health".into(),
            encrypted: false,
            auth: None,
        };
        let err = executor
            .execute::<(), Health>(spec, None)
            .await
            .unwrap_err();
        match err {
            RequestError::Http { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body.unwrap()["message"], "unknown signer");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retryable_status_exhausts_the_budget() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/signers/health");
                then.status(503);
            })
            .await;

        let executor = executor(&server.base_url(), quick_retry(2));
        let spec = RequestSpec {
            method: http::Method::GET,
            path: "/health".into(),
            encrypted: false,
            auth: None,
        };
        let err = executor
            .execute::<(), Health>(spec, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Http { status: 503, .. }));
        // initial attempt plus two retries
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn malformed_success_body_is_a_schema_violation() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/signers/health");
                then.status(200).json_body(serde_json::json!({"ok": "yes"}));
            })
            .await;

        let executor = executor(&server.base_url(), quick_retry(1));
        let spec = RequestSpec {
            method: http::Method::GET,
            path: "/health".into(),
            encrypted: false,
            auth: None,
        };
        let err = executor
            .execute::<(), Health>(spec, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::OutputSchemaViolation(_)));
    }

    #[tokio::test]
    async fn encrypted_response_is_opened_against_the_attested_sender() {
        use crate::crypto::hpke::{self as channel, SecureChannel};
        use crate::testutil::{Harness, TestBackend};
        use framekey_core::wire::EncryptedEnvelope;
        use std::sync::Arc;

        let harness = Harness::new().await;
        let backend: Arc<TestBackend> = Arc::new(TestBackend::default());
        let tee_provider = harness.tee_provider(backend);

        // The TEE side seals the payload in auth mode under its own key.
        let tee_channel = SecureChannel::new(
            channel::kem_private_key(&harness.tee_secret.to_bytes()).unwrap(),
            channel::kem_public_key(&crate::crypto::sec1_bytes(&harness.tee_public)).unwrap(),
        );
        let client_kem = channel::kem_public_key(&crate::crypto::sec1_bytes(
            harness.identity.p256_public(),
        ))
        .unwrap();
        let sealed = tee_channel
            .seal_authenticated(&client_kem, &serde_json::json!({"ok": true}))
            .unwrap();
        let envelope = EncryptedEnvelope {
            ciphertext: BASE64.encode(&sealed.ciphertext),
            encapsulated_key: BASE64.encode(&sealed.encapsulated_key),
            public_key: BASE64.encode(&sealed.sender_public_key),
        };

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/signers/secret");
                then.status(200).json_body(serde_json::to_value(&envelope).unwrap());
            })
            .await;

        let executor = executor(&server.base_url(), quick_retry(1))
            .with_encryption(Arc::new(harness.identity.channel()), tee_provider);
        let spec = RequestSpec {
            method: http::Method::GET,
            path: "/secret".into(),
            encrypted: true,
            auth: None,
        };
        let health: Health = executor.execute::<(), _>(spec, None).await.unwrap();
        assert_eq!(health, Health { ok: true });
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_request() {
        struct Rejecting;
        impl Serialize for Rejecting {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_unit()
            }
        }
        impl ApiBody for Rejecting {
            fn validate(&self) -> Result<(), String> {
                Err("otp must be digits".into())
            }
        }

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/signers/health");
                then.status(200).json_body(serde_json::json!({"ok": true}));
            })
            .await;

        let executor = executor(&server.base_url(), quick_retry(1));
        let spec = RequestSpec {
            method: http::Method::POST,
            path: "/health".into(),
            encrypted: false,
            auth: None,
        };
        let err = executor
            .execute::<Rejecting, Health>(spec, Some(&Rejecting))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::InputSchemaViolation(_)));
        mock.assert_hits_async(0).await;
    }
}
