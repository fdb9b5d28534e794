//! JSON codec for request and response payloads.
//!
//! Payload types supply their own serde implementations; this module only
//! pins the wire format and folds serde failures into the two payload error
//! classes the status taxonomy distinguishes.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

pub fn encode<B: Serialize>(value: &B) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Error::Serialization)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(Error::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        name: String,
        size: u32,
    }

    #[test]
    fn encode_then_decode_preserves_value() {
        let widget = Widget { name: "bolt".into(), size: 7 };
        let bytes = encode(&widget).unwrap();
        let back: Widget = decode(&bytes).unwrap();
        assert_eq!(back, widget);
    }

    #[test]
    fn decode_failure_is_a_deserialization_error() {
        let err = decode::<Widget>(b"{\"name\": 5}").unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }
}
