//! Key and value codecs for the flat SSDB wire format
//!
//! Keys join the location segments, the attribute name, and (for dynamic
//! attributes) the dynamic component with `|`:
//! `account|47e456be-…|authTokens|366778080`. Values carry the optional
//! expiration inline, `value|` or `value|<epoch-millis>`, because the backend
//! keeps no per-key metadata beyond its TTL clock.

use ephemeral_core::{AttributeInput, AttributeKey, Location, Result, StoreError};

/// Reserved separator. No location segment, attribute name, or dynamic
/// component may contain it.
pub const DELIMITER: char = '|';

/// Encode `(key, location)` into the flat backend key.
///
/// Segments containing the delimiter would make the key ambiguous on decode,
/// so they are rejected rather than written.
pub fn encode_key(key: &AttributeKey, location: &Location) -> Result<String> {
    let mut parts: Vec<&str> = Vec::with_capacity(location.segments().len() + 2);
    for segment in location.segments() {
        parts.push(segment);
    }
    parts.push(key.name());
    if let Some(dynamic) = key.dynamic_component() {
        parts.push(dynamic);
    }
    join_validated(&parts)
}

/// Encode the location alone, as used for prefix scans.
pub fn encode_location(location: &Location) -> Result<String> {
    let parts: Vec<&str> = location.segments().iter().map(String::as_str).collect();
    join_validated(&parts)
}

fn join_validated(parts: &[&str]) -> Result<String> {
    for part in parts {
        if part.contains(DELIMITER) {
            return Err(StoreError::Configuration(format!(
                "key segment '{part}' contains the reserved delimiter '{DELIMITER}'"
            )));
        }
    }
    Ok(parts.join("|"))
}

/// Recover the attribute key from an encoded backend key.
///
/// A well-formed key has at least entity type, entity id, and attribute name;
/// a fourth segment is the dynamic component.
pub fn decode_key(encoded: &str) -> Result<AttributeKey> {
    let segments: Vec<&str> = encoded.split(DELIMITER).collect();
    if segments.len() < 3 {
        return Err(StoreError::KeyParse(encoded.to_string()));
    }
    let name = segments[2];
    Ok(match segments.get(3) {
        Some(dynamic) => AttributeKey::dynamic(name, *dynamic),
        None => AttributeKey::new(name),
    })
}

/// Value codec.
///
/// `json_compat` additionally quotes encoded values as JSON strings, for
/// backends shared with a consumer that expects JSON-typed values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCodec {
    json_compat: bool,
}

impl ValueCodec {
    pub fn new(json_compat: bool) -> Self {
        Self { json_compat }
    }

    /// Encode an input's value and expiration.
    ///
    /// Returns `None` when the input value is null; the caller must treat
    /// that as "delete this key", never as "write an empty string".
    pub fn encode(&self, input: &AttributeInput) -> Option<String> {
        let value = input.value()?;
        let encoded = match input.expiration().map(|e| e.absolute_millis()) {
            Some(millis) if millis > 0 => format!("{value}{DELIMITER}{millis}"),
            _ => format!("{value}{DELIMITER}"),
        };
        if !self.json_compat || encoded.starts_with('{') || encoded.starts_with('[') {
            return Some(encoded);
        }
        // The sibling consumer treats bare strings as invalid JSON.
        Some(serde_json::Value::String(encoded).to_string())
    }

    /// Decode a previously encoded value into `(value, expiry-millis)`.
    ///
    /// A trailing delimiter means no expiry. A non-numeric trailing segment
    /// means the raw string was written by something else; it is returned
    /// whole rather than dropped.
    pub fn decode(&self, raw: &str) -> (String, Option<u64>) {
        let raw = if self.json_compat {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(serde_json::Value::String(inner)) => inner,
                _ => raw.to_string(),
            }
        } else {
            raw.to_string()
        };
        if let Some(value) = raw.strip_suffix(DELIMITER) {
            return (value.to_string(), None);
        }
        match raw.rsplit_once(DELIMITER) {
            Some((value, trailer)) => match trailer.parse::<u64>() {
                Ok(millis) => (value.to_string(), Some(millis)),
                Err(_) => (raw.clone(), None),
            },
            None => (raw.clone(), None),
        }
    }
}
