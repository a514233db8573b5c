// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reply decoding and field selection.

use crate::broker::Delivery;
use crate::codec::{self, Payload, PayloadType};
use crate::error::RpcResult;
use crate::types::{header_str, Headers, RECEIVE_TYPE_HEADER, SIGNATURE_HEADER};
use serde::{Deserialize, Serialize};

/// Which fields of an inbound message are surfaced to application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseContains {
    pub content: bool,
    pub headers: bool,
    pub signature: bool,
}

impl Default for ResponseContains {
    fn default() -> Self {
        Self::content_only()
    }
}

impl ResponseContains {
    pub fn content_only() -> Self {
        Self {
            content: true,
            headers: false,
            signature: false,
        }
    }

    pub fn all() -> Self {
        Self {
            content: true,
            headers: true,
            signature: true,
        }
    }

    /// Policy applied to requests: signatures only exist on replies.
    pub fn inbound(self) -> Self {
        Self {
            signature: false,
            ..self
        }
    }
}

/// The value handed to application code. Unselected fields are `None` and
/// omitted when serialized.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResponseView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ResponseView {
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }
}

/// Declared payload type of a delivery.
pub fn receive_type(delivery: &Delivery) -> PayloadType {
    PayloadType::from_tag(header_str(&delivery.properties.headers, RECEIVE_TYPE_HEADER))
}

/// Decode `delivery` and keep the fields selected by `policy`.
pub fn decode_delivery(delivery: &Delivery, policy: &ResponseContains) -> RpcResult<ResponseView> {
    let headers = &delivery.properties.headers;

    let content = if policy.content {
        Some(codec::decode(&delivery.body, receive_type(delivery))?)
    } else {
        None
    };

    let signature = if policy.signature {
        header_str(headers, SIGNATURE_HEADER).map(str::to_string)
    } else {
        None
    };

    Ok(ResponseView {
        content,
        headers: policy.headers.then(|| headers.clone()),
        signature,
    })
}
