//! Wire schemas of the signers API.
//!
//! These structs are the source of truth for what crosses the HTTP boundary.
//! Parsing is strict where the contract is closed; fields the backend may add
//! without coordination are tolerated only on response types that say so.

use crate::codec::is_base64;
use serde::{Deserialize, Serialize};

/// HPKE envelope carried in both directions for encrypted endpoints.
///
/// All three fields are standard padded base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub encapsulated_key: String,
    pub public_key: String,
}

impl EncryptedEnvelope {
    /// Structural validation of the envelope fields before any of them reach
    /// the base64 decoder or the HPKE receiver.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("ciphertext", &self.ciphertext),
            ("encapsulatedKey", &self.encapsulated_key),
            ("publicKey", &self.public_key),
        ] {
            if !is_base64(value) {
                return Err(format!("{name} is not valid base64"));
            }
        }
        Ok(())
    }
}

/// Attestation payload returned by `GET /attestation`.
///
/// `quote` is hex, `public_key` base64, `event_log` a JSON document in string
/// form. The envelope is self-authenticating: the quote commits to the public
/// key through its report data, and the quote's RTMR3 must equal the replay of
/// the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationDoc {
    pub quote: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub event_log: String,
    pub hash_algorithm: String,
    pub prefix: String,
}

/// Server-vouched public key, only used by the development bypass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: String,
}

/// AES-256-GCM wrapped master secret. `bytes` decodes to
/// `IV(12) || ciphertext || tag(16)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedUserKey {
    pub bytes: String,
    pub encoding: String,
    pub encryption_public_key: String,
}

/// Integrity hash of the master secret plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKeyHash {
    pub bytes: String,
    pub encoding: String,
    pub algorithm: String,
}

/// Encrypted master secret record for one device.
///
/// `signature` and `signing_public_key` belong to a retired record shape; when
/// present the signature must be verified over the ciphertext before the
/// record is accepted, never ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMasterKey {
    pub device_id: String,
    pub signer_id: String,
    pub encrypted_user_key: EncryptedUserKey,
    pub user_key_hash: UserKeyHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_public_key: Option<String>,
}

/// Client encryption context advertised during onboarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionContext {
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOnboardingRequest {
    pub auth_id: String,
    pub encryption_context: EncryptionContext,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOnboardingRequest {
    pub otp: String,
    pub public_key: String,
    pub device_id: String,
}

/// Response body for endpoints that acknowledge without a contract of their
/// own. Unknown fields are tolerated here on purpose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub message: Option<String>,
}
