// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for request/reply operations.

use crate::broker::BrokerError;
use crate::config::ConfigError;
use thiserror::Error;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors that can occur during RPC operations
#[derive(Debug, Error)]
pub enum RpcError {
    /// No satisfying reply arrived before the deadline (single-reply calls only)
    #[error("RPC request timed out")]
    Timeout,

    /// Operation used on a shut down client, or a reply without a source message
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Publish/declare/consume rejected by the broker
    #[error("Broker failure: {0}")]
    Broker(#[from] BrokerError),

    /// Payload cannot be interpreted per its declared type tag
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// Invalid route or client configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A plain-route handler failed; ends the route's consumer
    #[error("Handler error: {0}")]
    Handler(String),
}

impl RpcError {
    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeFailure(message.into())
    }

    /// True for [`RpcError::Timeout`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// True for [`RpcError::InvalidState`]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::Timeout;
        assert!(err.to_string().contains("timed out"));

        let err = RpcError::invalid_state("no source message");
        assert!(err.to_string().contains("no source message"));

        let err = RpcError::decode("bad json");
        assert!(err.to_string().contains("bad json"));
    }

    #[test]
    fn test_rpc_error_from_broker() {
        let err: RpcError = BrokerError::QueueNotFound("replies".into()).into();
        assert!(matches!(err, RpcError::Broker(BrokerError::QueueNotFound(_))));
        assert!(err.to_string().contains("replies"));
    }

    #[test]
    fn test_rpc_error_predicates() {
        assert!(RpcError::Timeout.is_timeout());
        assert!(!RpcError::Timeout.is_invalid_state());
        assert!(RpcError::invalid_state("x").is_invalid_state());
    }
}
