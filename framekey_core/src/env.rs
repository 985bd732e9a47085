//! Deployment environments and API key parsing.
//!
//! The environment is never configured directly; it is derived from the API
//! key the host application supplies, so a staging key can never be pointed
//! at the production backend by accident.

use serde::{Deserialize, Serialize};

/// Deployment environment of the signer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Base URL of the signer backend for this environment.
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Development => "http://localhost:3000",
            Environment::Staging => "https://staging.framekey.io",
            Environment::Production => "https://api.framekey.io",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "development" => Some(Environment::Development),
            "staging" => Some(Environment::Staging),
            "production" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Who the API key was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Server,
    Client,
}

/// The two components of an API key that matter to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiKey {
    pub origin: KeyOrigin,
    pub environment: Environment,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid API key: expected an (sk|ck)_(development|staging|production)_ prefix")]
pub struct InvalidApiKey;

/// Parses an API key of the form `{sk|ck}_{environment}_{rest}`.
pub fn parse_api_key(key: &str) -> Result<ApiKey, InvalidApiKey> {
    let mut parts = key.splitn(3, '_');
    let origin = match parts.next() {
        Some("sk") => KeyOrigin::Server,
        Some("ck") => KeyOrigin::Client,
        _ => return Err(InvalidApiKey),
    };
    let environment = parts
        .next()
        .and_then(Environment::parse)
        .ok_or(InvalidApiKey)?;
    match parts.next() {
        Some(rest) if !rest.is_empty() => Ok(ApiKey {
            origin,
            environment,
        }),
        _ => Err(InvalidApiKey),
    }
}
