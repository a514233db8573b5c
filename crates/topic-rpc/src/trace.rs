// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trace-id propagation through the `X-Request-Id` header.

use crate::types::{header_str, HeaderValue, Headers, REQUEST_ID_HEADER};
use uuid::Uuid;

/// Return the trace id carried by `headers`, or a fresh one.
pub fn extract_or_generate(headers: &Headers) -> String {
    header_str(headers, REQUEST_ID_HEADER)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generate)
}

/// Set the trace id on `headers`, replacing any differently-cased copy.
pub fn inject(headers: &mut Headers, id: &str) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(REQUEST_ID_HEADER));
    headers.insert(REQUEST_ID_HEADER.to_string(), HeaderValue::from(id));
}

/// Generate a new trace id.
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}
