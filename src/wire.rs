//! Envelope wire format (v1.0)
//!
//! An envelope is the standard base64 (with padding) of a compact JSON object
//! with exactly these string members, in this order:
//!
//! ```text
//! {"version":"1.0","algorithm":"AES-GCM","key_id":"..","nonce":"<b64 12 bytes>",
//!  "ciphertext":"<b64 ct||tag>","timestamp":"2026-01-01T00:00:00.000000+00:00"}
//! ```
//!
//! Decoding is strict: unknown members, missing members, non-string values,
//! a wrong version or algorithm, a nonce that isn't 12 bytes and a
//! ciphertext shorter than one tag are all [`MalformedEnvelope`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedEnvelope;

pub const ENVELOPE_VERSION: &str = "1.0";
pub const ALGORITHM: &str = "AES-GCM";

pub const NONCE_BYTES: usize = 12;
pub const AEAD_TAG_BYTES: usize = 16;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvelope {
    version: String,
    algorithm: String,
    key_id: String,
    nonce: String,
    ciphertext: String,
    timestamp: String,
}

/// Parsed view of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key_id: String,
    pub nonce: [u8; NONCE_BYTES],
    /// Ciphertext with the GCM tag appended.
    pub ciphertext: Vec<u8>,
    /// Creation time as written by the encrypting side. Informational only.
    pub timestamp: String,
}

impl Envelope {
    pub fn new(
        key_id: impl Into<String>,
        nonce: [u8; NONCE_BYTES],
        ciphertext: Vec<u8>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            nonce,
            ciphertext,
            timestamp: format_timestamp(created),
        }
    }

    pub fn encode(&self) -> String {
        let raw = RawEnvelope {
            version: ENVELOPE_VERSION.to_string(),
            algorithm: ALGORITHM.to_string(),
            key_id: self.key_id.clone(),
            nonce: STANDARD.encode(self.nonce),
            ciphertext: STANDARD.encode(&self.ciphertext),
            timestamp: self.timestamp.clone(),
        };
        let json = serde_json::to_vec(&raw).expect("envelope of string fields always serializes");
        STANDARD.encode(json)
    }

    pub fn decode(encoded: &str) -> Result<Self, MalformedEnvelope> {
        let json = STANDARD.decode(encoded).map_err(|_| MalformedEnvelope)?;
        let value: serde_json::Value =
            serde_json::from_slice(&json).map_err(|_| MalformedEnvelope)?;
        // serde would also accept a six-element array for the struct.
        if !value.is_object() {
            return Err(MalformedEnvelope);
        }
        let raw: RawEnvelope = serde_json::from_value(value).map_err(|_| MalformedEnvelope)?;

        if raw.version != ENVELOPE_VERSION || raw.algorithm != ALGORITHM {
            return Err(MalformedEnvelope);
        }

        let nonce: [u8; NONCE_BYTES] = STANDARD
            .decode(&raw.nonce)
            .map_err(|_| MalformedEnvelope)?
            .try_into()
            .map_err(|_| MalformedEnvelope)?;

        let ciphertext = STANDARD.decode(&raw.ciphertext).map_err(|_| MalformedEnvelope)?;
        if ciphertext.len() < AEAD_TAG_BYTES {
            return Err(MalformedEnvelope);
        }

        Ok(Self {
            key_id: raw.key_id,
            nonce,
            ciphertext,
            timestamp: raw.timestamp,
        })
    }

    /// Parsed creation time, if the timestamp is valid RFC 3339.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Microsecond precision with an explicit `+00:00` offset.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, false)
}
