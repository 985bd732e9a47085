//! Byte string codecs for the signer wire formats.
//!
//! Everything that crosses the frame boundary is carried as text: quotes and
//! measurement registers as hex, key material and ciphertexts as standard
//! padded base64, Ed25519 artifacts as Bitcoin-alphabet base58. Decoding is
//! strict; a string that does not round-trip is rejected rather than
//! repaired.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use std::sync::LazyLock;

/// Supported text encodings for byte strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Hex,
    Base58,
    Base64,
}

impl std::str::FromStr for Encoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hex" => Ok(Encoding::Hex),
            "base58" => Ok(Encoding::Base58),
            "base64" => Ok(Encoding::Base64),
            other => Err(CodecError::UnknownEncoding(other.to_string())),
        }
    }
}

/// Possible errors when decoding a byte string.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid hex input: {0}")]
    Hex(String),

    #[error("invalid base58 input: {0}")]
    Base58(String),

    #[error("invalid base64 input: {0}")]
    Base64(String),

    #[error("unknown encoding: {0:?}")]
    UnknownEncoding(String),
}

/// Encodes bytes under the given encoding.
///
/// Hex output is lowercase, two characters per byte. Base58 uses the Bitcoin
/// alphabet and preserves leading zero bytes as leading `1`s. Base64 is
/// standard and padded.
pub fn encode(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Hex => hex::encode(bytes),
        Encoding::Base58 => bs58::encode(bytes).into_string(),
        Encoding::Base64 => BASE64.encode(bytes),
    }
}

/// Decodes a string under the given encoding.
///
/// Hex accepts an optional `0x` prefix and an odd number of digits (a zero is
/// padded on the left); any non-hex character fails. Base58 rejects characters
/// outside the Bitcoin alphabet. Base64 rejects structurally invalid input.
pub fn decode(input: &str, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Hex => {
            let s = input.strip_prefix("0x").unwrap_or(input);
            let padded;
            let s = if s.len() % 2 == 1 {
                padded = format!("0{s}");
                &padded
            } else {
                s
            };
            hex::decode(s).map_err(|err| CodecError::Hex(err.to_string()))
        }
        Encoding::Base58 => bs58::decode(input)
            .into_vec()
            .map_err(|err| CodecError::Base58(err.to_string())),
        Encoding::Base64 => BASE64
            .decode(input)
            .map_err(|err| CodecError::Base64(err.to_string())),
    }
}

static BASE64_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9+/]{4})*(([A-Za-z0-9+/]{2}==)|([A-Za-z0-9+/]{3}=))?$")
        .expect("base64 pattern should compile")
});

/// Structural check for standard padded base64, used to validate encrypted
/// envelope fields before they reach the decoder.
pub fn is_base64(input: &str) -> bool {
    BASE64_RE.is_match(input)
}
