//! JSON Codec using `serde_json`

use crate::traits::CacheCodec;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON Codec using `serde_json`
///
/// Compact by default. The pretty form keeps persisted files readable when they
/// are inspected by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    /// Codec producing indented output
    #[must_use]
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        bytes.context("Failed to encode cache record as JSON")
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).context("Failed to decode cache record from JSON")
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pretty_output_is_indented() {
        let value = json!({"id": 1});
        let compact = JsonCodec::default().serialize(&value).unwrap();
        let pretty = JsonCodec::pretty().serialize(&value).unwrap();
        assert_eq!(compact, br#"{"id":1}"#);
        assert!(pretty.contains(&b'\n'));
    }

    #[test]
    fn test_decode_error_has_context() {
        let err = JsonCodec::default()
            .deserialize::<serde_json::Value>(b"{not json")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to decode cache record"));
    }
}
