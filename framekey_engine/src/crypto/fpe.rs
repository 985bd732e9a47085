//! Format-preserving encryption for one-time passwords.
//!
//! FF1 over radix 10, keyed with the same ECDH-derived AES-256 key that
//! unwraps the master secret. A code tunneled through the user's display
//! keeps its shape: digits in, the same number of digits out.

use fpe::ff1::{FF1, FlexibleNumeralString};

const RADIX: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum FpeError {
    #[error("FF1 setup failed: {0}")]
    Setup(String),

    #[error("input must be decimal digits, got {0:?}")]
    NotDigits(char),

    #[error("FF1 {0} failed: {1}")]
    Cipher(&'static str, String),
}

/// FF1 cipher over decimal digit strings.
pub struct FpeCipher {
    ff1: FF1<aes::Aes256>,
    tweak: Vec<u8>,
}

impl FpeCipher {
    /// Builds the cipher from the shared AES-256 key and an optional tweak.
    pub fn new(key: &[u8; 32], tweak: Option<&[u8]>) -> Result<Self, FpeError> {
        let ff1 = FF1::<aes::Aes256>::new(key, RADIX)
            .map_err(|err| FpeError::Setup(format!("{err:?}")))?;
        Ok(Self {
            ff1,
            tweak: tweak.unwrap_or_default().to_vec(),
        })
    }

    pub fn encrypt_digits(&self, digits: &str) -> Result<String, FpeError> {
        let input = parse_digits(digits)?;
        let output = self
            .ff1
            .encrypt(&self.tweak, &FlexibleNumeralString::from(input))
            .map_err(|err| FpeError::Cipher("encrypt", format!("{err:?}")))?;
        Ok(render_digits(output))
    }

    pub fn decrypt_digits(&self, digits: &str) -> Result<String, FpeError> {
        let input = parse_digits(digits)?;
        let output = self
            .ff1
            .decrypt(&self.tweak, &FlexibleNumeralString::from(input))
            .map_err(|err| FpeError::Cipher("decrypt", format!("{err:?}")))?;
        Ok(render_digits(output))
    }
}

fn parse_digits(digits: &str) -> Result<Vec<u16>, FpeError> {
    digits
        .chars()
        .map(|c| {
            c.to_digit(RADIX)
                .map(|d| d as u16)
                .ok_or(FpeError::NotDigits(c))
        })
        .collect()
}

fn render_digits(numerals: FlexibleNumeralString) -> String {
    Vec::<u16>::from(numerals)
        .into_iter()
        .map(|d| char::from_digit(u32::from(d), RADIX).expect("numeral below the radix"))
        .collect()
}
