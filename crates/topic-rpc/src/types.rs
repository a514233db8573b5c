// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core wire types for request/reply correlation.
//!
//! Correlation ids and reply-to identities travel as broker-native message
//! properties; everything else rides in the header table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trace id header, propagated from request to reply.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Payload type tag header (see [`crate::codec::PayloadType`]).
pub const RECEIVE_TYPE_HEADER: &str = "x-receive-type";

/// Responder identity header, present on replies only.
pub const SIGNATURE_HEADER: &str = "signature";

/// Scalar header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl HeaderValue {
    /// Borrow the string form, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for HeaderValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for HeaderValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Message header table.
pub type Headers = BTreeMap<String, HeaderValue>;

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a HeaderValue> {
    headers.get(name).or_else(|| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Case-insensitive string header lookup.
pub fn header_str<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    header(headers, name).and_then(HeaderValue::as_str)
}

/// Broker-native message properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    /// Correlation id linking a reply to its request
    pub correlation_id: Option<String>,
    /// Queue the responder should publish its reply to
    pub reply_to: Option<String>,
    /// Application headers
    pub headers: Headers,
}

/// Unique identifier for an outstanding call, used for reply correlation.
///
/// Combines the owning client's id with a per-client sequence number, so
/// tokens are never reused within a client and never collide across clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new CorrelationId
    pub fn new(client_id: &str, sequence: u64) -> Self {
        Self(format!("{}.{}", client_id, sequence))
    }

    /// Wrap a correlation id received off the wire
    pub fn from_wire(raw: &str) -> Self {
        Self(raw.to_string())
    }

    /// Borrow the wire form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_correlation_id_hash() {
        let id1 = CorrelationId::new("client", 1);
        let id2 = CorrelationId::new("client", 2);
        let id1_wire = CorrelationId::from_wire("client.1");

        let mut set = HashSet::new();
        set.insert(id1);
        set.insert(id2);

        assert_eq!(set.len(), 2);
        assert!(set.contains(&id1_wire));
    }

    #[test]
    fn test_correlation_id_distinct_clients() {
        assert_ne!(CorrelationId::new("a", 7), CorrelationId::new("b", 7));
        assert_eq!(CorrelationId::new("a", 7).as_str(), "a.7");
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("x-request-id".into(), "abc".into());
        headers.insert("count".into(), 3i64.into());

        assert_eq!(header_str(&headers, REQUEST_ID_HEADER), Some("abc"));
        assert_eq!(header(&headers, "COUNT"), Some(&HeaderValue::Int(3)));
        assert_eq!(header_str(&headers, "count"), None);
        assert!(header(&headers, "missing").is_none());
    }

    #[test]
    fn test_header_value_serde_untagged() {
        let value: HeaderValue = serde_json::from_str("\"server\"").expect("parse");
        assert_eq!(value, HeaderValue::Str("server".into()));
        let value: HeaderValue = serde_json::from_str("42").expect("parse");
        assert_eq!(value, HeaderValue::Int(42));
        assert_eq!(HeaderValue::Bool(true).to_string(), "true");
    }
}
