// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC Client (Requester) implementation.
//!
//! The RpcClient publishes requests to a topic exchange and waits for
//! correlated replies on its reply queue.

mod listener;
mod pending;

pub use pending::CallState;

use crate::broker::{BrokerChannel, ConsumeOptions, OutboundMessage, QueueOptions};
use crate::codec::{self, Payload, PayloadType};
use crate::config::{ClientConfig, ConfigError};
use crate::error::{RpcError, RpcResult};
use crate::response::{ResponseContains, ResponseView};
use crate::topology::{TopologyCache, TopologyKey};
use crate::trace;
use crate::types::{
    CorrelationId, HeaderValue, Headers, MessageProperties, RECEIVE_TYPE_HEADER, SIGNATURE_HEADER,
};
use listener::ReplyListener;
use pending::{PendingCall, PendingTable};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Topic exchange to publish to
    pub exchange: String,
    /// Routing key of the request
    pub routing_key: String,
    /// Reply queue override; the client's configured queue when `None`
    pub reply_queue: Option<String>,
    /// Call timeout; the client's default when `None`
    pub timeout: Option<Duration>,
    /// Reply field selection; the client's default when `None`
    pub response_contains: Option<ResponseContains>,
    /// Payload encoding; inferred from the payload when `None`
    pub payload_type: Option<PayloadType>,
    /// Extra request headers
    pub headers: Headers,
    /// Multi-reply calls complete once every signature here replied
    pub expected_signatures: HashSet<String>,
}

impl CallOptions {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            ..Default::default()
        }
    }

    pub fn reply_queue(mut self, queue: impl Into<String>) -> Self {
        self.reply_queue = Some(queue.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn response_contains(mut self, policy: ResponseContains) -> Self {
        self.response_contains = Some(policy);
        self
    }

    pub fn payload_type(mut self, ty: PayloadType) -> Self {
        self.payload_type = Some(ty);
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Resolve a multi-reply call early once all of `signatures` replied
    pub fn expect_signatures<I, S>(mut self, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_signatures = signatures.into_iter().map(Into::into).collect();
        self
    }
}

/// RPC client over a topic broker.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use topic_rpc::{CallOptions, ClientConfig, MemoryBroker, ResponseContains, RpcClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RpcClient::new(Arc::new(MemoryBroker::new()), ClientConfig::default());
///
/// let replies = client
///     .call_many_with(
///         serde_json::json!({"message": "OurMessage"}),
///         CallOptions::new("testExchange", "testRoutingKey")
///             .timeout(Duration::from_millis(2000))
///             .response_contains(ResponseContains::all()),
///         |reply| async move {
///             println!("reply from {:?}", reply.signature());
///         },
///     )
///     .await?;
/// println!("{} replies", replies.len());
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    broker: Arc<dyn BrokerChannel>,

    config: ClientConfig,

    /// Random per-instance prefix of every correlation id
    client_id: String,

    /// Sequence number counter
    sequence: AtomicU64,

    /// Pending requests: correlation id -> reply sink
    pending: Arc<PendingTable>,

    topology: TopologyCache,

    /// Reply listeners keyed by requested reply queue name
    listeners: Mutex<HashMap<String, ReplyListener>>,

    /// Shutdown flag
    shutdown: AtomicBool,
}

impl RpcClient {
    /// Create a new RPC client. Reply listeners start on first use.
    pub fn new(broker: Arc<dyn BrokerChannel>, config: ClientConfig) -> Self {
        Self {
            broker,
            config,
            client_id: trace::generate(),
            sequence: AtomicU64::new(1),
            pending: Arc::new(PendingTable::new()),
            topology: TopologyCache::new(),
            listeners: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Number of outstanding calls
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn topology(&self) -> &TopologyCache {
        &self.topology
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Send a request and wait for the first reply.
    ///
    /// Fails with [`RpcError::Timeout`] when no reply arrives in time.
    pub async fn call(
        &self,
        payload: impl Into<Payload>,
        options: CallOptions,
    ) -> RpcResult<ResponseView> {
        self.check_running()?;
        let reply_to = self.ensure_listener(&options).await?;
        let deadline = self.deadline_of(&options)?;

        let id = self.next_correlation_id();
        let (tx, mut rx) = oneshot::channel();
        let _pending = self.pending.register(
            id.clone(),
            PendingCall::single(tx, self.response_contains_of(&options), deadline),
        );

        self.send_request(payload.into(), &options, &id, &reply_to).await?;

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.dropped_call_error()),
            Err(_) => {
                if self.pending.expire(&id) {
                    tracing::warn!(
                        role = "Rpc Client",
                        exchange = %options.exchange,
                        topic = %options.routing_key,
                        correlation_id = %id,
                        "Request timed out"
                    );
                    return Err(RpcError::Timeout);
                }
                // Resolved concurrently with the deadline
                match rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(self.dropped_call_error()),
                }
            }
        }
    }

    /// Send a request and collect every reply until the deadline.
    pub async fn call_many(
        &self,
        payload: impl Into<Payload>,
        options: CallOptions,
    ) -> RpcResult<Vec<ResponseView>> {
        self.call_many_with(payload, options, |_| async {}).await
    }

    /// Send a request and collect every reply until the deadline, passing
    /// each one to `on_reply` as it arrives.
    ///
    /// `on_reply` runs sequentially in arrival order. Zero replies is not an
    /// error. With [`CallOptions::expect_signatures`] the call completes as
    /// soon as every expected responder replied.
    pub async fn call_many_with<F, Fut>(
        &self,
        payload: impl Into<Payload>,
        options: CallOptions,
        mut on_reply: F,
    ) -> RpcResult<Vec<ResponseView>>
    where
        F: FnMut(ResponseView) -> Fut,
        Fut: Future<Output = ()>,
    {
        self.check_running()?;
        let reply_to = self.ensure_listener(&options).await?;
        let deadline = self.deadline_of(&options)?;

        let id = self.next_correlation_id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _pending = self.pending.register(
            id.clone(),
            PendingCall::many(
                tx,
                options.expected_signatures.clone(),
                self.response_contains_of(&options),
                deadline,
            ),
        );

        self.send_request(payload.into(), &options, &id, &reply_to).await?;

        let mut replies = Vec::new();
        let state = loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(view)) => {
                    on_reply(view.clone()).await;
                    replies.push(view);
                }
                Ok(None) if self.is_shut_down() => return Err(self.dropped_call_error()),
                Ok(None) => break CallState::Satisfied,
                Err(_) => {
                    self.pending.expire(&id);
                    // Replies accepted before expiry are still reported
                    while let Ok(view) = rx.try_recv() {
                        on_reply(view.clone()).await;
                        replies.push(view);
                    }
                    break CallState::TimedOut;
                }
            }
        };

        tracing::debug!(
            role = "Rpc Client",
            exchange = %options.exchange,
            topic = %options.routing_key,
            correlation_id = %id,
            "Multi-reply call finished ({:?}) with {} replies",
            state,
            replies.len()
        );
        Ok(replies)
    }

    /// Publish without expecting a reply.
    pub async fn publish(&self, payload: impl Into<Payload>, options: CallOptions) -> RpcResult<()> {
        self.check_running()?;
        self.topology
            .ensure(
                self.broker.as_ref(),
                &TopologyKey::exchange(options.exchange.as_str()),
            )
            .await?;

        let (message, request_id) = build_request(&payload.into(), &options);
        self.broker
            .publish(&options.exchange, &options.routing_key, message)
            .await?;

        tracing::debug!(
            role = "Client",
            exchange = %options.exchange,
            topic = %options.routing_key,
            request_id = %request_id,
            "Message published"
        );
        Ok(())
    }

    /// Shutdown the client: stop reply listeners and fail outstanding calls.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut listeners = self.listeners.lock().await;
        for (_, listener) in listeners.drain() {
            if let Err(e) = self.broker.cancel(listener.consumer_tag()).await {
                tracing::debug!(
                    role = "Rpc Client",
                    "Cancel of reply consumer on '{}' failed: {}",
                    listener.queue(),
                    e
                );
            }
            listener.abort();
        }

        // Clear pending requests
        self.pending.clear();
    }

    fn check_running(&self) -> RpcResult<()> {
        if self.is_shut_down() {
            return Err(RpcError::invalid_state("client is shut down"));
        }
        Ok(())
    }

    fn dropped_call_error(&self) -> RpcError {
        if self.is_shut_down() {
            RpcError::invalid_state("client shut down during call")
        } else {
            // Removed by the listener past its deadline
            RpcError::Timeout
        }
    }

    fn next_correlation_id(&self) -> CorrelationId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        CorrelationId::new(&self.client_id, seq)
    }

    fn timeout_of(&self, options: &CallOptions) -> Duration {
        options
            .timeout
            .unwrap_or_else(|| self.config.default_timeout())
    }

    fn deadline_of(&self, options: &CallOptions) -> RpcResult<Instant> {
        let timeout = self.timeout_of(options);
        Instant::now().checked_add(timeout).ok_or_else(|| {
            RpcError::Config(ConfigError::Invalid(format!(
                "call timeout {:?} is out of range",
                timeout
            )))
        })
    }

    fn response_contains_of(&self, options: &CallOptions) -> ResponseContains {
        options
            .response_contains
            .unwrap_or(self.config.response_contains)
    }

    /// Start the reply listener for the call's reply queue if needed and
    /// return the queue's broker name.
    async fn ensure_listener(&self, options: &CallOptions) -> RpcResult<String> {
        let requested = options
            .reply_queue
            .as_deref()
            .unwrap_or(&self.config.reply_queue);

        let mut listeners = self.listeners.lock().await;
        if let Some(listener) = listeners.get(requested) {
            if listener.is_running() {
                return Ok(listener.queue().to_string());
            }
        }

        let queue = self
            .broker
            .declare_queue(requested, QueueOptions::reply_queue())
            .await?;
        let consumer = self
            .broker
            .consume(&queue, ConsumeOptions { no_ack: true })
            .await?;

        tracing::debug!(
            role = "Rpc Client",
            "Reply listener for '{}' started on '{}'",
            self.config.name,
            queue
        );
        listeners.insert(
            requested.to_string(),
            ReplyListener::spawn(consumer, queue.clone(), self.pending.clone()),
        );
        Ok(queue)
    }

    async fn send_request(
        &self,
        payload: Payload,
        options: &CallOptions,
        id: &CorrelationId,
        reply_to: &str,
    ) -> RpcResult<()> {
        self.topology
            .ensure(
                self.broker.as_ref(),
                &TopologyKey::exchange(options.exchange.as_str()),
            )
            .await?;

        let (mut message, request_id) = build_request(&payload, options);
        message.properties.correlation_id = Some(id.to_string());
        message.properties.reply_to = Some(reply_to.to_string());

        self.broker
            .publish(&options.exchange, &options.routing_key, message)
            .await?;

        tracing::debug!(
            role = "Rpc Client",
            exchange = %options.exchange,
            topic = %options.routing_key,
            request_id = %request_id,
            correlation_id = %id,
            "Request published"
        );
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        for listener in self.listeners.get_mut().values() {
            listener.abort();
        }
    }
}

/// Encode a request and its headers. Returns the message and its trace id.
fn build_request(payload: &Payload, options: &CallOptions) -> (OutboundMessage, String) {
    let ty = options.payload_type.unwrap_or_else(|| payload.payload_type());

    let mut headers = options.headers.clone();
    // Signatures belong to replies
    headers.retain(|key, _| !key.eq_ignore_ascii_case(SIGNATURE_HEADER));
    let request_id = trace::extract_or_generate(&headers);
    trace::inject(&mut headers, &request_id);
    headers.retain(|key, _| !key.eq_ignore_ascii_case(RECEIVE_TYPE_HEADER));
    headers.insert(RECEIVE_TYPE_HEADER.to_string(), ty.as_str().into());

    let message = OutboundMessage {
        body: codec::encode(payload, ty),
        properties: MessageProperties {
            correlation_id: None,
            reply_to: None,
            headers,
        },
    };
    (message, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerOp, MemoryBroker};
    use crate::types::{header_str, REQUEST_ID_HEADER};
    use serde_json::json;

    #[test]
    fn test_build_request_headers() {
        let options = CallOptions::new("ex", "a.b")
            .header("x-request-id", "trace-7")
            .header("Signature", "spoofed");
        let (message, request_id) = build_request(&Payload::Json(json!({"n": 1})), &options);

        assert_eq!(request_id, "trace-7");
        let headers = &message.properties.headers;
        assert_eq!(header_str(headers, REQUEST_ID_HEADER), Some("trace-7"));
        assert_eq!(header_str(headers, RECEIVE_TYPE_HEADER), Some("json"));
        assert!(header_str(headers, SIGNATURE_HEADER).is_none());
        assert_eq!(message.body, br#"{"n":1}"#);
    }

    #[test]
    fn test_build_request_explicit_type() {
        let options = CallOptions::new("ex", "k").payload_type(PayloadType::Text);
        let (message, _) = build_request(&Payload::Json(json!("hi")), &options);
        assert_eq!(
            header_str(&message.properties.headers, RECEIVE_TYPE_HEADER),
            Some("text")
        );
    }

    #[test]
    fn test_correlation_ids_unique() {
        let client = RpcClient::new(Arc::new(MemoryBroker::new()), ClientConfig::default());
        let a = client.next_correlation_id();
        let b = client.next_correlation_id();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(client.client_id()));
    }

    #[tokio::test]
    async fn test_listener_started_once() {
        let broker = Arc::new(MemoryBroker::new());
        let client = RpcClient::new(
            broker.clone(),
            ClientConfig::builder().reply_queue("client-replies").build(),
        );

        let options = CallOptions::new("ex", "k");
        let first = client.ensure_listener(&options).await.unwrap();
        let second = client.ensure_listener(&options).await.unwrap();
        assert_eq!(first, "client-replies");
        assert_eq!(first, second);
        assert_eq!(broker.consumer_count("client-replies"), Some(1));
    }

    #[tokio::test]
    async fn test_publish_failure_clears_pending() {
        let broker = Arc::new(MemoryBroker::new());
        let client = RpcClient::new(broker.clone(), ClientConfig::default());

        broker.fail_next(BrokerOp::Publish);
        let err = client
            .call(json!({}), CallOptions::new("ex", "k"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Broker(_)));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_timeout_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        let client = RpcClient::new(broker.clone(), ClientConfig::default());

        let options = CallOptions::new("ex", "k").timeout(Duration::MAX);
        let err = client.call(json!({}), options.clone()).await.unwrap_err();
        assert!(matches!(err, RpcError::Config(_)));
        let err = client.call_many(json!({}), options).await.unwrap_err();
        assert!(matches!(err, RpcError::Config(_)));

        assert_eq!(client.pending_calls(), 0);
        assert_eq!(broker.stats().publishes, 0);
    }

    #[tokio::test]
    async fn test_plain_publish() {
        let broker = Arc::new(MemoryBroker::new());
        let client = RpcClient::new(broker.clone(), ClientConfig::default());

        client
            .publish("hello", CallOptions::new("events", "user.created"))
            .await
            .unwrap();
        assert!(broker.has_exchange("events"));
        assert_eq!(broker.stats().publishes, 1);
        assert_eq!(broker.stats().unroutable, 1);
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let broker = Arc::new(MemoryBroker::new());
        let client = RpcClient::new(broker.clone(), ClientConfig::default());
        client
            .ensure_listener(&CallOptions::new("ex", "k"))
            .await
            .unwrap();

        client.shutdown().await;
        assert!(client.is_shut_down());

        let err = client
            .call(json!({}), CallOptions::new("ex", "k"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
        let err = client
            .call_many(json!({}), CallOptions::new("ex", "k"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
    }
}
