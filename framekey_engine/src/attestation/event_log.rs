//! Application event log: digest validation, RTMR3 replay and application
//! info extraction.
//!
//! RTMR3 is the runtime measurement register the guest extends with one entry
//! per application event. The log is only trustworthy once every entry's
//! digest recomputes from its content and the register replayed from the
//! digests equals the value the quote reports.

use super::AttestationError;
use crate::crypto::sha384;
use serde::Deserialize;

/// Measurement register width, SHA-384 sized.
pub const MR_LEN: usize = 48;

/// The measurement register application events extend.
pub const APP_IMR: u32 = 3;

/// One entry of the guest event log.
#[derive(Debug, Clone, Deserialize)]
pub struct EventLogEntry {
    pub imr: u32,
    pub event_type: u32,
    pub digest: String,
    pub event: String,
    pub event_payload: String,
}

/// Application identity carried by the recognized events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub app_id: String,
    pub compose_hash: String,
    pub instance_id: String,
    pub key_provider: KeyProvider,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyProvider {
    pub name: String,
    pub id: String,
}

/// Parses the JSON event log and keeps the RTMR3 entries, in log order.
pub fn parse_rtmr3_entries(raw: &str) -> Result<Vec<EventLogEntry>, AttestationError> {
    let entries: Vec<EventLogEntry> =
        serde_json::from_str(raw).map_err(|err| AttestationError::MalformedEventLog(err.to_string()))?;
    Ok(entries.into_iter().filter(|e| e.imr == APP_IMR).collect())
}

/// Payload bytes of an entry: the hex decoding of the payload, or its UTF-8
/// bytes when the payload is not hex.
pub fn payload_bytes(entry: &EventLogEntry) -> Vec<u8> {
    hex::decode(&entry.event_payload)
        .unwrap_or_else(|_| entry.event_payload.clone().into_bytes())
}

/// Recomputes an entry's digest from its content and compares it verbatim.
///
/// The digest input is `LE32(event_type) || ":" || event || ":" || payload`.
pub fn validate_event(entry: &EventLogEntry) -> bool {
    let payload = payload_bytes(entry);
    let mut buf = Vec::with_capacity(4 + 1 + entry.event.len() + 1 + payload.len());
    buf.extend_from_slice(&entry.event_type.to_le_bytes());
    buf.push(b':');
    buf.extend_from_slice(entry.event.as_bytes());
    buf.push(b':');
    buf.extend_from_slice(&payload);
    hex::encode(sha384(&buf)) == entry.digest
}

/// Replays RTMR3 from the filtered entries: starting from 48 zero bytes,
/// each digest is right-padded to the register width and folded in with
/// SHA-384.
pub fn replay_rtmr3(entries: &[EventLogEntry]) -> Result<String, AttestationError> {
    let mut mr = vec![0u8; MR_LEN];
    for entry in entries {
        let mut digest = hex::decode(&entry.digest)
            .map_err(|_| AttestationError::InvalidEventDigest(entry.event.clone()))?;
        if digest.len() < MR_LEN {
            digest.resize(MR_LEN, 0);
        }
        mr.extend_from_slice(&digest);
        mr = sha384(&mr).to_vec();
    }
    Ok(hex::encode(mr))
}

/// Collects the recognized application events.
pub fn extract_application_info(
    entries: &[EventLogEntry],
) -> Result<ApplicationInfo, AttestationError> {
    let find = |name: &'static str| {
        entries
            .iter()
            .find(|e| e.event == name)
            .map(|e| e.event_payload.clone())
            .ok_or(AttestationError::MissingApplicationEvents(name))
    };

    let app_id = find("app-id")?;
    let compose_hash = find("compose-hash")?;
    let instance_id = find("instance-id")?;
    let key_provider = parse_key_provider(&find("key-provider")?)?;

    Ok(ApplicationInfo {
        app_id,
        compose_hash,
        instance_id,
        key_provider,
    })
}

/// The key-provider payload is a JSON object, usually hex-encoded; a payload
/// that is not hex is parsed as JSON directly. Anything but
/// `{name: "kms", id: <string>}` is rejected.
fn parse_key_provider(payload: &str) -> Result<KeyProvider, AttestationError> {
    let text = match hex::decode(payload) {
        Ok(bytes) => String::from_utf8(bytes)
            .map_err(|err| AttestationError::InvalidKeyProvider(err.to_string()))?,
        Err(_) => payload.to_string(),
    };
    let provider: KeyProvider = serde_json::from_str(&text)
        .map_err(|err| AttestationError::InvalidKeyProvider(err.to_string()))?;
    if provider.name != "kms" {
        return Err(AttestationError::InvalidKeyProvider(format!(
            "unexpected provider name {:?}",
            provider.name
        )));
    }
    Ok(provider)
}

/// Builds a correctly-digested entry, for the verifier's own tests.
#[cfg(test)]
pub(crate) fn test_entry(event: &str, payload: &str) -> EventLogEntry {
    let mut e = EventLogEntry {
        imr: APP_IMR,
        event_type: 134217729,
        digest: String::new(),
        event: event.to_string(),
        event_payload: payload.to_string(),
    };
    let payload = payload_bytes(&e);
    let mut buf = Vec::new();
    buf.extend_from_slice(&e.event_type.to_le_bytes());
    buf.push(b':');
    buf.extend_from_slice(e.event.as_bytes());
    buf.push(b':');
    buf.extend_from_slice(&payload);
    e.digest = hex::encode(sha384(&buf));
    e
}
