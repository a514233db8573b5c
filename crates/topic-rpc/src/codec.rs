// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload encoding keyed by the `x-receive-type` tag.
//!
//! `encode` is total: a value of another kind is converted to the requested
//! type. `decode` fails only when the bytes do not fit the declared type.

use crate::error::{RpcError, RpcResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Payload type tag carried in the `x-receive-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    /// UTF-8 JSON document
    Json,
    /// UTF-8 text
    Text,
    /// Opaque bytes
    #[default]
    Binary,
}

impl PayloadType {
    /// Wire tag
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }

    /// Parse a wire tag. Missing or unknown tags mean binary.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::Json,
            Some("text") | Some("string") => Self::Text,
            _ => Self::Binary,
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded message payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// The type tag this value encodes as by default
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Self::Json(_) => PayloadType::Json,
            Self::Text(_) => PayloadType::Text,
            Self::Binary(_) => PayloadType::Binary,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

/// Encode `value` as `ty`.
pub fn encode(value: &Payload, ty: PayloadType) -> Vec<u8> {
    match (ty, value) {
        (PayloadType::Json, Payload::Json(v)) => v.to_string().into_bytes(),
        (PayloadType::Json, Payload::Text(s)) => Value::String(s.clone()).to_string().into_bytes(),
        (PayloadType::Json, Payload::Binary(b)) => {
            Value::Array(b.iter().map(|byte| Value::from(*byte)).collect())
                .to_string()
                .into_bytes()
        }
        (PayloadType::Text | PayloadType::Binary, Payload::Json(v)) => v.to_string().into_bytes(),
        (PayloadType::Text | PayloadType::Binary, Payload::Text(s)) => s.as_bytes().to_vec(),
        // text must stay valid UTF-8
        (PayloadType::Text, Payload::Binary(b)) => String::from_utf8_lossy(b).into_owned().into_bytes(),
        (PayloadType::Binary, Payload::Binary(b)) => b.clone(),
    }
}

/// Decode `bytes` declared as `ty`.
pub fn decode(bytes: &[u8], ty: PayloadType) -> RpcResult<Payload> {
    match ty {
        PayloadType::Json => serde_json::from_slice(bytes)
            .map(Payload::Json)
            .map_err(|e| RpcError::decode(format!("invalid json payload: {}", e))),
        PayloadType::Text => String::from_utf8(bytes.to_vec())
            .map(Payload::Text)
            .map_err(|e| RpcError::decode(format!("invalid utf-8 text payload: {}", e))),
        PayloadType::Binary => Ok(Payload::Binary(bytes.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_per_type() {
        let values = [
            Payload::Json(json!({"message": "OurMessage", "n": [1, 2.5, null, true]})),
            Payload::Json(json!("bare string")),
            Payload::Text("héllo wörld".into()),
            Payload::Text(String::new()),
            Payload::Binary(vec![0, 159, 146, 150, 255]),
            Payload::Binary(Vec::new()),
        ];

        for value in values {
            let ty = value.payload_type();
            let decoded = decode(&encode(&value, ty), ty).expect("decode");
            assert_eq!(decoded, value, "round trip for {}", ty);
        }
    }

    #[test]
    fn test_encode_converts_across_types() {
        let text = Payload::Text("hi".into());
        assert_eq!(
            decode(&encode(&text, PayloadType::Json), PayloadType::Json).unwrap(),
            Payload::Json(json!("hi"))
        );

        let bytes = Payload::Binary(vec![1, 2]);
        assert_eq!(
            decode(&encode(&bytes, PayloadType::Json), PayloadType::Json).unwrap(),
            Payload::Json(json!([1, 2]))
        );

        let doc = Payload::Json(json!({"a": 1}));
        assert_eq!(encode(&doc, PayloadType::Text), br#"{"a":1}"#.to_vec());

        let invalid = Payload::Binary(vec![0xff, b'a']);
        assert!(decode(&encode(&invalid, PayloadType::Text), PayloadType::Text).is_ok());
    }

    #[test]
    fn test_decode_failures() {
        let err = decode(b"{not json", PayloadType::Json).unwrap_err();
        assert!(matches!(err, RpcError::DecodeFailure(_)));

        let err = decode(&[0xff, 0xfe], PayloadType::Text).unwrap_err();
        assert!(matches!(err, RpcError::DecodeFailure(_)));

        assert!(decode(&[0xff, 0xfe], PayloadType::Binary).is_ok());
    }

    #[test]
    fn test_payload_type_tags() {
        assert_eq!(PayloadType::from_tag(Some("json")), PayloadType::Json);
        assert_eq!(PayloadType::from_tag(Some("JSON")), PayloadType::Json);
        assert_eq!(PayloadType::from_tag(Some("string")), PayloadType::Text);
        assert_eq!(PayloadType::from_tag(Some("weird")), PayloadType::Binary);
        assert_eq!(PayloadType::from_tag(None), PayloadType::Binary);
        for ty in [PayloadType::Json, PayloadType::Text, PayloadType::Binary] {
            assert_eq!(PayloadType::from_tag(Some(ty.as_str())), ty);
        }
    }
}
