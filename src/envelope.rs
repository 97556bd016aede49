//! Envelope codec for encrypted fragments.
//!
//! An envelope is a JSON object carrying KMS ciphertext:
//!
//! ```json
//! {
//!   "cipher": "AQICAHh...base64...",
//!   "key_id": "alias/deploy"
//! }
//! ```
//!
//! The only structurally significant member is `cipher`. A JSON object whose
//! `cipher` is a non-empty string is encrypted; everything else, including
//! non-JSON bytes and objects with an empty `cipher`, is plain content. This
//! lets plain and encrypted fragments share a directory without any naming
//! convention.
//!
//! Classification has two tiers. [`is_encrypted`] is the loose check, and
//! [`decode`] is the strict parse that only runs once the loose check has
//! passed. [`classify`] combines both into a single tagged result.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// The member whose presence marks content as encrypted.
pub const CIPHER_FIELD: &str = "cipher";

/// The optional member naming the key that produced the ciphertext.
pub const KEY_ID_FIELD: &str = "key_id";

/// Decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Raw ciphertext as returned by the key-management service
    pub ciphertext: Vec<u8>,
    /// Key identifier, if the envelope recorded one
    pub key_id: Option<String>,
}

/// Result of inspecting a byte blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Not an envelope; use the bytes as they are
    Plain,
    /// A well-formed envelope
    Encrypted(Envelope),
    /// Passed the loose check but failed strict parsing
    Malformed(String),
}

impl Classification {
    pub fn is_plain(&self) -> bool {
        matches!(self, Classification::Plain)
    }
}

#[derive(Serialize)]
struct EnvelopeRepr<'a> {
    cipher: String,
    key_id: &'a str,
}

/// Serialize ciphertext into the canonical envelope form.
///
/// The output is pretty-printed JSON with a trailing newline, so encrypted
/// files diff cleanly in version control.
///
/// # Errors
///
/// Returns [`Error::EnvelopeCorrupt`] if `ciphertext` is empty, since an
/// empty `cipher` would read back as plain content.
pub fn encode(key_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() {
        return Err(Error::EnvelopeCorrupt {
            reason: "refusing to encode empty ciphertext".to_string(),
        });
    }

    let repr = EnvelopeRepr {
        cipher: STANDARD.encode(ciphertext),
        key_id,
    };
    let mut out = serde_json::to_vec_pretty(&repr).map_err(Error::Serialization)?;
    out.push(b'\n');
    Ok(out)
}

/// Loose check: does `bytes` look like an envelope?
///
/// Never fails. Anything that does not parse as a JSON object with a
/// non-empty string `cipher` is classified as not encrypted.
pub fn is_encrypted(bytes: &[u8]) -> bool {
    cipher_member(bytes).is_some()
}

/// Strict parse, used once [`is_encrypted`] has returned true.
///
/// # Errors
///
/// Returns [`Error::EnvelopeCorrupt`] if the content is not a JSON object,
/// if `cipher` is missing, empty, not a string or not valid base64, or if
/// `key_id` is present with a non-string value.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let corrupt = |reason: String| Error::EnvelopeCorrupt { reason };

    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| corrupt("envelope must be a JSON object".to_string()))?;

    let cipher = match object.get(CIPHER_FIELD) {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::String(_)) => return Err(corrupt("`cipher` is empty".to_string())),
        Some(other) => {
            return Err(corrupt(format!(
                "`cipher` must be a string, found: {}",
                other
            )))
        }
        None => return Err(corrupt("missing `cipher` field".to_string())),
    };

    let ciphertext = STANDARD
        .decode(cipher.trim())
        .map_err(|e| corrupt(format!("`cipher` is not valid base64: {}", e)))?;
    if ciphertext.is_empty() {
        return Err(corrupt("`cipher` decodes to zero bytes".to_string()));
    }

    let key_id = match object.get(KEY_ID_FIELD) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(corrupt(format!(
                "`key_id` must be a string, found: {}",
                other
            )))
        }
    };

    Ok(Envelope { ciphertext, key_id })
}

/// Classify `bytes` as plain, encrypted or malformed.
pub fn classify(bytes: &[u8]) -> Classification {
    if !is_encrypted(bytes) {
        return Classification::Plain;
    }
    match decode(bytes) {
        Ok(envelope) => Classification::Encrypted(envelope),
        Err(Error::EnvelopeCorrupt { reason }) => Classification::Malformed(reason),
        Err(other) => Classification::Malformed(other.to_string()),
    }
}

fn cipher_member(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    match value.get(CIPHER_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
