use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The probe payload: a JSON object `{"key": "..."}` carried as the whole UDP body.
///
/// Decoding ignores unknown fields so that newer senders can add metadata
/// without breaking older monitors. A missing `key` is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedPacket {
    pub key: String,
}

impl KeyedPacket {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// A packet carrying a fresh v4 UUID as its key.
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }
        // serde maps a struct from a sequence too, so `["A"]` must be rejected here
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        if !value.is_object() {
            return Err(DecodeError::NotObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Exact, case-sensitive comparison.
    pub fn matches(&self, expected: &str) -> bool {
        self.key == expected
    }
}
