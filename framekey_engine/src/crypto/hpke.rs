//! Hybrid public-key encryption channel to the attested TEE.
//!
//! Suite: DHKEM(P-256, HKDF-SHA256) / HKDF-SHA256 / AES-256-GCM (RFC 9180).
//! Outbound messages are sealed in base mode; the user proves who they are at
//! a higher layer, so the channel does not authenticate the sender. Inbound
//! messages are opened in auth mode bound to the attested TEE public key,
//! which stops a man in the middle from substituting messages that claim to
//! come from the TEE.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hpke::aead::AesGcm256;
use hpke::kdf::HkdfSha256;
use hpke::kem::DhP256HkdfSha256;
use hpke::{Deserializable, Kem, OpModeR, OpModeS, Serializable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// KEM of the channel suite.
pub type ChannelKem = DhP256HkdfSha256;
pub type KemPrivateKey = <ChannelKem as Kem>::PrivateKey;
pub type KemPublicKey = <ChannelKem as Kem>::PublicKey;

#[derive(Debug, thiserror::Error)]
pub enum HpkeChannelError {
    #[error("HPKE seal failed: {0}")]
    Seal(String),

    #[error("HPKE open failed: {0}")]
    Open(String),

    #[error("invalid key material: {0}")]
    Key(String),

    #[error("envelope codec error: {0}")]
    Codec(String),
}

/// Sealed message ready to be carried as a wire envelope.
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub encapsulated_key: Vec<u8>,
    pub sender_public_key: Vec<u8>,
}

/// Inner JSON envelope carried inside the HPKE ciphertext.
#[derive(Serialize, Deserialize)]
struct ChannelEnvelope<T> {
    data: T,
    #[serde(rename = "encryptionContext")]
    encryption_context: ChannelContext,
}

#[derive(Serialize, Deserialize)]
struct ChannelContext {
    #[serde(rename = "senderPublicKey")]
    sender_public_key: String,
}

/// One side of the hybrid-encrypted channel, holding its own KEM key pair.
pub struct SecureChannel {
    kem_secret: KemPrivateKey,
    kem_public: KemPublicKey,
}

impl SecureChannel {
    pub fn new(kem_secret: KemPrivateKey, kem_public: KemPublicKey) -> Self {
        Self {
            kem_secret,
            kem_public,
        }
    }

    /// SEC1-serialized public key of this side of the channel.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.kem_public.to_bytes().to_vec()
    }

    /// Seals a payload to `recipient` in base mode.
    ///
    /// The payload is wrapped as `{data, encryptionContext: {senderPublicKey}}`
    /// so the recipient can address its reply without a directory lookup.
    pub fn seal<T: Serialize>(
        &self,
        recipient: &KemPublicKey,
        payload: &T,
    ) -> Result<SealedMessage, HpkeChannelError> {
        self.seal_with_mode(&OpModeS::Base, recipient, payload)
    }

    /// Seals a payload to `recipient` in auth mode, proving it came from this
    /// channel's key pair. This is the TEE-side direction of the protocol; the
    /// client only uses it against itself in tests.
    pub fn seal_authenticated<T: Serialize>(
        &self,
        recipient: &KemPublicKey,
        payload: &T,
    ) -> Result<SealedMessage, HpkeChannelError> {
        let mode = OpModeS::Auth((self.kem_secret.clone(), self.kem_public.clone()));
        self.seal_with_mode(&mode, recipient, payload)
    }

    fn seal_with_mode<T: Serialize>(
        &self,
        mode: &OpModeS<ChannelKem>,
        recipient: &KemPublicKey,
        payload: &T,
    ) -> Result<SealedMessage, HpkeChannelError> {
        let envelope = ChannelEnvelope {
            data: payload,
            encryption_context: ChannelContext {
                sender_public_key: BASE64.encode(self.kem_public.to_bytes()),
            },
        };
        let plaintext =
            serde_json::to_vec(&envelope).map_err(|err| HpkeChannelError::Codec(err.to_string()))?;

        let mut rng = rand::rng();
        let (encapped, mut ctx) = hpke::setup_sender::<AesGcm256, HkdfSha256, ChannelKem, _>(
            mode, recipient, b"", &mut rng,
        )
        .map_err(|err| HpkeChannelError::Seal(err.to_string()))?;
        let ciphertext = ctx
            .seal(&plaintext, b"")
            .map_err(|err| HpkeChannelError::Seal(err.to_string()))?;

        Ok(SealedMessage {
            ciphertext,
            encapsulated_key: encapped.to_bytes().to_vec(),
            sender_public_key: self.kem_public.to_bytes().to_vec(),
        })
    }

    /// Opens a ciphertext in auth mode, requiring it to have been sealed by
    /// `sender`. Any substitution of the sender key fails the open.
    pub fn open<T: DeserializeOwned>(
        &self,
        sender: &KemPublicKey,
        ciphertext: &[u8],
        encapsulated_key: &[u8],
    ) -> Result<T, HpkeChannelError> {
        let encapped = <ChannelKem as Kem>::EncappedKey::from_bytes(encapsulated_key)
            .map_err(|err| HpkeChannelError::Key(err.to_string()))?;
        let mut ctx = hpke::setup_receiver::<AesGcm256, HkdfSha256, ChannelKem>(
            &OpModeR::Auth(sender.clone()),
            &self.kem_secret,
            &encapped,
            b"",
        )
        .map_err(|err| HpkeChannelError::Open(err.to_string()))?;
        let plaintext = ctx
            .open(ciphertext, b"")
            .map_err(|err| HpkeChannelError::Open(err.to_string()))?;

        let envelope: ChannelEnvelope<T> = serde_json::from_slice(&plaintext)
            .map_err(|err| HpkeChannelError::Codec(err.to_string()))?;
        Ok(envelope.data)
    }
}

/// Parses a KEM public key from its SEC1 serialization.
pub fn kem_public_key(bytes: &[u8]) -> Result<KemPublicKey, HpkeChannelError> {
    KemPublicKey::from_bytes(bytes).map_err(|err| HpkeChannelError::Key(err.to_string()))
}

/// Parses a KEM private key from its 32-byte scalar serialization.
pub fn kem_private_key(bytes: &[u8]) -> Result<KemPrivateKey, HpkeChannelError> {
    KemPrivateKey::from_bytes(bytes).map_err(|err| HpkeChannelError::Key(err.to_string()))
}

/// Generates a fresh channel key pair.
pub fn generate_key_pair() -> (KemPrivateKey, KemPublicKey) {
    ChannelKem::gen_keypair(&mut rand::rng())
}
