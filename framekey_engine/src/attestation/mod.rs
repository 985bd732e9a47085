//! Remote attestation of the TEE peer.
//!
//! Before any key material is exchanged, the remote peer must prove it is a
//! specific application running inside genuine Intel TDX hardware. The proof
//! is an attestation envelope: a DCAP quote, the peer's public key and the
//! guest event log. Verification is a sequence of hard gates; the public key
//! is only usable after the last gate passes.

use crate::crypto::{self, sha512};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dcap_qvl::verify::VerifiedReport;
use framekey_core::env::Environment;
use framekey_core::wire::AttestationDoc;
use parking_lot::RwLock;
use std::time::Duration;
use structured_logger::unix_ms;

pub mod event_log;

use event_log::{extract_application_info, parse_rtmr3_entries, replay_rtmr3, validate_event};

/// DCAP collateral provisioning service for TDX quotes.
pub const DEFAULT_PCCS_URL: &str = "https://pccs.phala.network/tdx/certification/v4";

/// Application identity the TEE peer must present.
pub const EXPECTED_APP_ID: &str = "7fb2d4a8e1c3906b5d2f8a417c6e0d93b8a1f5c2";

const COLLATERAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("quote verification failed: {0}")]
    QuoteVerification(String),

    #[error("TEE status is {0:?}, expected \"UpToDate\"")]
    InvalidTeeStatus(String),

    #[error("quote carries no TDX report body")]
    MalformedReport,

    #[error("event log is not valid JSON: {0}")]
    MalformedEventLog(String),

    #[error("event digest does not recompute for event {0:?}")]
    InvalidEventDigest(String),

    #[error("RTMR3 replay {replayed} does not match reported {reported}")]
    Rtmr3Mismatch { replayed: String, reported: String },

    #[error("event log is missing application event {0:?}")]
    MissingApplicationEvents(&'static str),

    #[error("key-provider event is invalid: {0}")]
    InvalidKeyProvider(String),

    #[error("attested app id {actual:?} does not match expected {expected:?}")]
    AppIdentityMismatch { expected: String, actual: String },

    #[error("public key is not bound by the quote report data")]
    PublicKeyNotAttested,

    #[error("no attested public key; verification has not run")]
    NotInitialized,

    #[error("attestation bypass is not allowed in production")]
    BypassForbidden,
}

/// Whether the verifier demands a real quote or accepts a server-vouched key.
///
/// `Bypass` exists for development against backends without TDX hardware. It
/// is never a default and is refused outright in production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationMode {
    Verify,
    Bypass,
}

/// Validates attestation envelopes and holds the attested key once a
/// verification has succeeded. The attested key is written once and read for
/// the rest of the session.
pub struct AttestationVerifier {
    expected_app_id: String,
    pccs_url: String,
    mode: AttestationMode,
    attested_key: RwLock<Option<p256::PublicKey>>,
}

impl AttestationVerifier {
    pub fn new(mode: AttestationMode, environment: Environment) -> Result<Self, AttestationError> {
        Self::with_app_id(mode, environment, EXPECTED_APP_ID, DEFAULT_PCCS_URL)
    }

    pub fn with_app_id(
        mode: AttestationMode,
        environment: Environment,
        expected_app_id: &str,
        pccs_url: &str,
    ) -> Result<Self, AttestationError> {
        if mode == AttestationMode::Bypass && environment == Environment::Production {
            return Err(AttestationError::BypassForbidden);
        }
        Ok(Self {
            expected_app_id: expected_app_id.to_string(),
            pccs_url: pccs_url.to_string(),
            mode,
            attested_key: RwLock::new(None),
        })
    }

    pub fn mode(&self) -> AttestationMode {
        self.mode
    }

    /// Runs the full gate sequence over an attestation envelope. On success
    /// the contained public key becomes the attested key.
    pub async fn verify(&self, doc: &AttestationDoc) -> Result<p256::PublicKey, AttestationError> {
        let (report_data, rt_mr3) = self.verify_quote(&doc.quote).await?;
        let key = self.verify_application(doc, &report_data, &rt_mr3)?;
        log::info!(
            app_id = self.expected_app_id.as_str();
            "TEE attestation verified"
        );
        *self.attested_key.write() = Some(key);
        Ok(key)
    }

    /// Gate 1 and 2: DCAP quote verification and TD report extraction.
    async fn verify_quote(&self, quote_hex: &str) -> Result<([u8; 64], [u8; 48]), AttestationError> {
        let quote = hex::decode(quote_hex)
            .map_err(|err| AttestationError::QuoteVerification(format!("quote is not hex: {err}")))?;
        let collateral =
            dcap_qvl::collateral::get_collateral(&self.pccs_url, &quote)
                .await
                .map_err(|err| {
                    AttestationError::QuoteVerification(format!("collateral fetch failed: {err:?}"))
                })?;
        let now_secs = unix_ms() / 1_000;
        let verified: VerifiedReport = dcap_qvl::verify::verify(&quote, &collateral, now_secs)
            .map_err(|err| AttestationError::QuoteVerification(format!("{err:?}")))?;

        if verified.status != "UpToDate" {
            return Err(AttestationError::InvalidTeeStatus(verified.status));
        }
        if let Some(td) = verified.report.as_td10() {
            return Ok((td.report_data, td.rt_mr3));
        }
        if let Some(td) = verified.report.as_td15() {
            return Ok((td.base.report_data, td.base.rt_mr3));
        }
        Err(AttestationError::MalformedReport)
    }

    /// Gates 3 and 4: event log integrity, application identity and public
    /// key binding. Pure over the extracted report fields.
    fn verify_application(
        &self,
        doc: &AttestationDoc,
        report_data: &[u8; 64],
        rt_mr3: &[u8; 48],
    ) -> Result<p256::PublicKey, AttestationError> {
        let entries = parse_rtmr3_entries(&doc.event_log)?;
        for entry in &entries {
            if !validate_event(entry) {
                return Err(AttestationError::InvalidEventDigest(entry.event.clone()));
            }
        }

        let replayed = replay_rtmr3(&entries)?;
        let reported = hex::encode(rt_mr3);
        if replayed != reported {
            return Err(AttestationError::Rtmr3Mismatch { replayed, reported });
        }

        let info = extract_application_info(&entries)?;
        if !info.app_id.eq_ignore_ascii_case(&self.expected_app_id) {
            return Err(AttestationError::AppIdentityMismatch {
                expected: self.expected_app_id.clone(),
                actual: info.app_id,
            });
        }

        let key_bytes = BASE64
            .decode(&doc.public_key)
            .map_err(|_| AttestationError::PublicKeyNotAttested)?;
        let mut preimage = Vec::with_capacity(doc.prefix.len() + 1 + key_bytes.len());
        preimage.extend_from_slice(doc.prefix.as_bytes());
        preimage.push(b':');
        preimage.extend_from_slice(&key_bytes);
        if !crypto::ct_eq(&sha512(&preimage), report_data) {
            return Err(AttestationError::PublicKeyNotAttested);
        }

        crypto::public_key_from_sec1(&key_bytes)
            .map_err(|_| AttestationError::PublicKeyNotAttested)
    }

    /// The attested public key, available once a verification (or an explicit
    /// bypass) has succeeded.
    pub fn attested_public_key(&self) -> Result<p256::PublicKey, AttestationError> {
        (*self.attested_key.read()).ok_or(AttestationError::NotInitialized)
    }

    #[cfg(test)]
    pub(crate) fn attested_key_for_tests(
        &self,
    ) -> parking_lot::RwLockWriteGuard<'_, Option<p256::PublicKey>> {
        self.attested_key.write()
    }

    /// Installs a server-vouched key without verification. Only callable on a
    /// bypass-mode verifier; every use is logged loudly.
    pub(crate) fn accept_unverified(
        &self,
        key: p256::PublicKey,
    ) -> Result<(), AttestationError> {
        if self.mode != AttestationMode::Bypass {
            return Err(AttestationError::NotInitialized);
        }
        log::warn!("attestation bypass: accepting a server-supplied TEE key without verification");
        *self.attested_key.write() = Some(key);
        Ok(())
    }
}
