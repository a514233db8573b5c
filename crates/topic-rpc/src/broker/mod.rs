// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker Channel Abstraction
//!
//! The request/reply engine talks to the message broker only through
//! [`BrokerChannel`]. Connection management and reconnection belong to the
//! implementation behind the trait.
//!
//! # Integration
//!
//! To run over a real AMQP client, implement `BrokerChannel` on top of its
//! channel type:
//!
//! ```ignore
//! #[async_trait]
//! impl BrokerChannel for AmqpChannel {
//!     async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
//!         // exchange.declare ...
//!     }
//!     // ...
//! }
//! ```
//!
//! [`MemoryBroker`] is an in-process implementation used by tests and the
//! CLI demo.

mod memory;
mod pattern;

pub use memory::{BrokerOp, BrokerStats, MemoryBroker};
pub use pattern::{is_valid_pattern, topic_matches};

use crate::types::MessageProperties;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Broker-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("exchange '{name}' already declared as {existing:?}")]
    ExchangeKindMismatch {
        name: String,
        existing: ExchangeKind,
    },

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    #[error("unknown consumer tag {0}")]
    UnknownConsumer(String),

    #[error("channel closed")]
    Closed,

    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Exchange routing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Dot-separated routing keys matched against `*` / `#` patterns
    Topic,
    /// Exact routing-key match
    Direct,
    /// Every bound queue
    Fanout,
}

/// Queue declaration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Options for a server request queue
    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Self::default()
        }
    }

    /// Options for a client-owned reply queue
    pub fn reply_queue() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Consumer options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Deliveries are considered acknowledged as soon as they are sent
    pub no_ack: bool,
}

/// Message handed to [`BrokerChannel::publish`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

/// Message received from a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Tag used for ack/nack on the consuming channel
    pub delivery_tag: u64,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Set when the message was requeued and delivered again
    pub redelivered: bool,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

/// A subscription on one queue.
#[derive(Debug)]
pub struct Consumer {
    tag: String,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

impl Consumer {
    pub fn new(tag: impl Into<String>, deliveries: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            tag: tag.into(),
            deliveries,
        }
    }

    /// Consumer tag, used with [`BrokerChannel::cancel`]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Next delivery; `None` once the consumer is cancelled or the channel closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }
}

/// Channel-like handle onto the message broker.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declare an exchange (idempotent for the same kind)
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError>;

    /// Declare a queue. An empty name asks the broker to generate one.
    /// Returns the queue name.
    async fn declare_queue(&self, name: &str, options: QueueOptions)
        -> Result<String, BrokerError>;

    /// Bind `queue` to `exchange` with a routing pattern
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publish a message. The empty exchange routes straight to the queue
    /// named by `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError>;

    /// Start consuming from `queue`
    async fn consume(&self, queue: &str, options: ConsumeOptions)
        -> Result<Consumer, BrokerError>;

    /// Acknowledge a delivery
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Reject a delivery, optionally putting it back on its queue
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Cancel a consumer; its delivery stream ends
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Close the channel
    async fn close(&self) -> Result<(), BrokerError>;
}
