// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-shot reply binding for an inbound request.

use super::stats::RouteStats;
use crate::broker::{BrokerChannel, OutboundMessage};
use crate::codec::{self, Payload, PayloadType};
use crate::error::{RpcError, RpcResult};
use crate::trace;
use crate::types::{Headers, MessageProperties, RECEIVE_TYPE_HEADER, SIGNATURE_HEADER};
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything needed to answer one request.
pub(crate) struct ReplySource {
    pub(crate) broker: Arc<dyn BrokerChannel>,
    pub(crate) delivery_tag: u64,
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
    pub(crate) correlation_id: Option<String>,
    pub(crate) reply_to: Option<String>,
    pub(crate) request_id: String,
    pub(crate) receive_type: PayloadType,
    pub(crate) stats: Arc<RouteStats>,
}

/// Bound `reply` operation handed to a request handler.
///
/// The first successful `reply` consumes the binding; any later call, or a
/// call on a [`Replier::detached`] replier, fails with
/// [`RpcError::InvalidState`] without touching the broker. Clones share the
/// same binding.
#[derive(Clone)]
pub struct Replier {
    inner: Arc<ReplierInner>,
}

struct ReplierInner {
    signature: String,
    source: Mutex<Option<ReplySource>>,
}

impl Replier {
    pub(crate) fn bound(signature: impl Into<String>, source: ReplySource) -> Self {
        Self {
            inner: Arc::new(ReplierInner {
                signature: signature.into(),
                source: Mutex::new(Some(source)),
            }),
        }
    }

    /// A replier with no source message
    pub fn detached(signature: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ReplierInner {
                signature: signature.into(),
                source: Mutex::new(None),
            }),
        }
    }

    /// Responder identity put on the reply
    pub fn signature(&self) -> &str {
        &self.inner.signature
    }

    /// True until the binding is used or disarmed
    pub fn is_armed(&self) -> bool {
        self.inner.source.lock().is_some()
    }

    /// Consume the binding without replying
    pub(crate) fn take_source(&self) -> Option<ReplySource> {
        self.inner.source.lock().take()
    }

    /// Publish `value` as the reply and acknowledge the request.
    ///
    /// The reply is encoded with the request's payload type. A failed reply
    /// publish is logged and the request is rejected without requeue; the
    /// error is not returned.
    pub async fn reply(&self, value: impl Into<Payload>) -> RpcResult<()> {
        let source = self
            .take_source()
            .ok_or_else(|| RpcError::invalid_state("reply called without a source message"))?;

        let payload = value.into();
        let Some(reply_to) = source.reply_to.clone() else {
            tracing::error!(
                role = "Rpc Server",
                exchange = %source.exchange,
                topic = %source.routing_key,
                request_id = %source.request_id,
                "Request has no reply-to, dropping reply"
            );
            reject(&source).await;
            return Ok(());
        };

        let mut headers = Headers::new();
        trace::inject(&mut headers, &source.request_id);
        headers.insert(
            RECEIVE_TYPE_HEADER.to_string(),
            source.receive_type.as_str().into(),
        );
        headers.insert(
            SIGNATURE_HEADER.to_string(),
            self.inner.signature.as_str().into(),
        );

        let message = OutboundMessage {
            body: codec::encode(&payload, source.receive_type),
            properties: MessageProperties {
                correlation_id: source.correlation_id.clone(),
                reply_to: None,
                headers,
            },
        };

        if let Err(e) = source.broker.publish("", &reply_to, message).await {
            tracing::error!(
                role = "Rpc Server",
                exchange = %source.exchange,
                topic = %source.routing_key,
                request_id = %source.request_id,
                correlation_id = source.correlation_id.as_deref().unwrap_or(""),
                "Failed to send reply: {}",
                e
            );
            reject(&source).await;
            return Ok(());
        }

        source.broker.ack(source.delivery_tag).await?;
        source.stats.record_reply();

        tracing::debug!(
            role = "Rpc Server",
            exchange = %source.exchange,
            topic = %source.routing_key,
            request_id = %source.request_id,
            correlation_id = source.correlation_id.as_deref().unwrap_or(""),
            "Reply sent to '{}'",
            reply_to
        );
        Ok(())
    }
}

/// Nack a request that could not be answered. It is not redelivered.
async fn reject(source: &ReplySource) {
    source.stats.record_reply_failure();
    if let Err(e) = source.broker.nack(source.delivery_tag, false).await {
        tracing::warn!(
            role = "Rpc Server",
            request_id = %source.request_id,
            "Failed to nack request: {}",
            e
        );
    }
}

impl std::fmt::Debug for Replier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replier")
            .field("signature", &self.inner.signature)
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerOp, ConsumeOptions, Delivery, MemoryBroker, QueueOptions};
    use crate::types::{header_str, REQUEST_ID_HEADER};

    /// Publish one request onto `requests` and return its delivery
    async fn request(broker: &MemoryBroker) -> Delivery {
        broker
            .declare_queue("requests", QueueOptions::durable())
            .await
            .unwrap();
        broker
            .declare_queue("replies", QueueOptions::reply_queue())
            .await
            .unwrap();
        let mut consumer = broker
            .consume("requests", ConsumeOptions::default())
            .await
            .unwrap();
        let message = OutboundMessage {
            body: b"ping".to_vec(),
            properties: MessageProperties {
                correlation_id: Some("c.1".into()),
                reply_to: Some("replies".into()),
                headers: Headers::new(),
            },
        };
        broker.publish("", "requests", message).await.unwrap();
        consumer.recv().await.unwrap()
    }

    fn bind(broker: &MemoryBroker, delivery: &Delivery, stats: Arc<RouteStats>) -> Replier {
        Replier::bound(
            "server-1",
            ReplySource {
                broker: Arc::new(broker.clone()),
                delivery_tag: delivery.delivery_tag,
                exchange: "ex".into(),
                routing_key: delivery.routing_key.clone(),
                correlation_id: delivery.properties.correlation_id.clone(),
                reply_to: delivery.properties.reply_to.clone(),
                request_id: "trace-1".into(),
                receive_type: PayloadType::Text,
                stats,
            },
        )
    }

    #[tokio::test]
    async fn test_reply_publishes_and_acks() {
        let broker = MemoryBroker::new();
        let delivery = request(&broker).await;
        let mut replies = broker
            .consume("replies", ConsumeOptions { no_ack: true })
            .await
            .unwrap();
        let stats = Arc::new(RouteStats::new("requests"));
        let replier = bind(&broker, &delivery, stats.clone());

        replier.reply("pong").await.unwrap();
        assert!(!replier.is_armed());

        let reply = replies.recv().await.unwrap();
        assert_eq!(reply.body, b"pong");
        assert_eq!(reply.properties.correlation_id.as_deref(), Some("c.1"));
        let headers = &reply.properties.headers;
        assert_eq!(header_str(headers, SIGNATURE_HEADER), Some("server-1"));
        assert_eq!(header_str(headers, REQUEST_ID_HEADER), Some("trace-1"));
        assert_eq!(header_str(headers, RECEIVE_TYPE_HEADER), Some("text"));

        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.stats().acks, 1);
        assert_eq!(stats.snapshot().replies_sent, 1);
    }

    #[tokio::test]
    async fn test_second_reply_is_invalid_state() {
        let broker = MemoryBroker::new();
        let delivery = request(&broker).await;
        let replier = bind(&broker, &delivery, Arc::new(RouteStats::new("requests")));

        replier.clone().reply("one").await.unwrap();
        let publishes = broker.stats().publishes;
        let err = replier.reply("two").await.unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(broker.stats().publishes, publishes);
    }

    #[tokio::test]
    async fn test_detached_replier() {
        let replier = Replier::detached("server");
        assert!(!replier.is_armed());
        assert!(replier.reply("x").await.unwrap_err().is_invalid_state());
    }

    #[tokio::test]
    async fn test_publish_failure_is_absorbed() {
        let broker = MemoryBroker::new();
        let delivery = request(&broker).await;
        let stats = Arc::new(RouteStats::new("requests"));
        let replier = bind(&broker, &delivery, stats.clone());

        broker.fail_next(BrokerOp::Publish);
        replier.reply("pong").await.unwrap();

        let broker_stats = broker.stats();
        assert_eq!(broker_stats.acks, 0);
        assert_eq!(broker_stats.nacks, 1);
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.queue_depth("requests"), Some(0));
        assert_eq!(stats.snapshot().reply_failures, 1);
    }
}
