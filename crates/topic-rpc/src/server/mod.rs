// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC Server (Replier) implementation.
//!
//! The RpcServer binds queues to topic patterns, dispatches each request to
//! a handler together with a one-shot [`Replier`], and tracks per-route
//! statistics.

mod replier;
mod stats;

pub use replier::Replier;
pub use stats::{RouteStats, RouteStatsSnapshot};

use crate::broker::{BrokerChannel, ConsumeOptions, Consumer, Delivery};
use crate::config::RouteConfig;
use crate::error::{RpcError, RpcResult};
use crate::response::{decode_delivery, receive_type, ResponseView};
use crate::topology::{TopologyCache, TopologyKey};
use crate::trace;
use async_trait::async_trait;
use replier::ReplySource;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Handler trait for processing RPC requests.
///
/// Implement this trait to define your service logic. The request is
/// answered through `reply`; returning an error instead rejects it.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a request.
    ///
    /// # Arguments
    /// * `request` - The decoded request (signature is never set)
    /// * `reply` - One-shot binding used to answer
    async fn handle(&self, request: ResponseView, reply: Replier) -> anyhow::Result<()>;
}

/// A function-based request handler.
#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(ResponseView, Replier) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, request: ResponseView, reply: Replier) -> anyhow::Result<()> {
        self(request, reply).await
    }
}

/// Handler trait for plain (non-RPC) routes.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: ResponseView) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(ResponseView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: ResponseView) -> anyhow::Result<()> {
        self(message).await
    }
}

/// RPC Server for handling requests on topic routes.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use topic_rpc::{MemoryBroker, Replier, ResponseView, RouteConfig, RpcServer};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = RpcServer::new(Arc::new(MemoryBroker::new()), "echo");
///
/// let route = server
///     .register_rpc_route(
///         |request: ResponseView, reply: Replier| async move {
///             if let Some(content) = request.content {
///                 reply.reply(content).await?;
///             }
///             anyhow::Ok(())
///         },
///         RouteConfig::new("testExchange", "testServerQueue", "*.15"),
///     )
///     .await?;
///
/// println!("{:?}", route.stats());
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    broker: Arc<dyn BrokerChannel>,
    name: String,
    topology: TopologyCache,
}

impl RpcServer {
    /// Create a new RPC server with its own topology cache.
    pub fn new(broker: Arc<dyn BrokerChannel>, name: impl Into<String>) -> Self {
        Self {
            broker,
            name: name.into(),
            topology: TopologyCache::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> &TopologyCache {
        &self.topology
    }

    /// Serve requests arriving on `route.queue`.
    ///
    /// Requests are acknowledged only once their reply was published.
    /// `route.no_ack` is ignored. A handler error is logged and the request
    /// rejected without requeue; the route keeps consuming.
    pub async fn register_rpc_route<H: RequestHandler>(
        &self,
        handler: H,
        route: RouteConfig,
    ) -> RpcResult<RouteHandle> {
        let consumer = self.subscribe(&route, false).await?;
        let stats = Arc::new(RouteStats::new(route.queue.as_str()));

        tracing::info!(
            role = "Rpc Server",
            exchange = %route.exchange,
            topic = %route.routing_key,
            "'{}' serving RPC route on queue '{}' (signature '{}')",
            self.name,
            route.queue,
            route.signature
        );

        let consumer_tag = consumer.tag().to_string();
        let task = tokio::spawn(run_rpc_route(
            consumer,
            Arc::new(handler),
            self.broker.clone(),
            Arc::new(route.clone()),
            stats.clone(),
        ));

        Ok(RouteHandle {
            queue: route.queue,
            consumer_tag,
            stats,
            task,
            broker: self.broker.clone(),
        })
    }

    /// Consume messages on `route.queue` without replying.
    ///
    /// The first handler error is logged, the message rejected without
    /// requeue, and the route stops; the error is returned by
    /// [`RouteHandle::join`].
    pub async fn register_route<H: MessageHandler>(
        &self,
        handler: H,
        route: RouteConfig,
    ) -> RpcResult<RouteHandle> {
        let consumer = self.subscribe(&route, route.no_ack).await?;
        let stats = Arc::new(RouteStats::new(route.queue.as_str()));

        tracing::info!(
            role = "Server",
            exchange = %route.exchange,
            topic = %route.routing_key,
            "'{}' serving route on queue '{}'",
            self.name,
            route.queue
        );

        let consumer_tag = consumer.tag().to_string();
        let task = tokio::spawn(run_route(
            consumer,
            Arc::new(handler),
            self.broker.clone(),
            Arc::new(route.clone()),
            stats.clone(),
        ));

        Ok(RouteHandle {
            queue: route.queue,
            consumer_tag,
            stats,
            task,
            broker: self.broker.clone(),
        })
    }

    async fn subscribe(&self, route: &RouteConfig, no_ack: bool) -> RpcResult<Consumer> {
        route.validate()?;
        self.topology
            .ensure(
                self.broker.as_ref(),
                &TopologyKey::binding(
                    route.exchange.as_str(),
                    route.queue.as_str(),
                    route.routing_key.as_str(),
                ),
            )
            .await?;
        Ok(self
            .broker
            .consume(&route.queue, ConsumeOptions { no_ack })
            .await?)
    }
}

/// Handle to a running route.
///
/// Dropping the handle leaves the route running.
pub struct RouteHandle {
    queue: String,
    consumer_tag: String,
    stats: Arc<RouteStats>,
    task: JoinHandle<RpcResult<()>>,
    broker: Arc<dyn BrokerChannel>,
}

impl std::fmt::Debug for RouteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteHandle")
            .field("queue", &self.queue)
            .field("consumer_tag", &self.consumer_tag)
            .field("stats", &self.stats)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl RouteHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Get snapshot of route statistics.
    pub fn stats(&self) -> RouteStatsSnapshot {
        self.stats.snapshot()
    }

    /// True once the route stopped consuming
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the route to stop.
    pub async fn join(self) -> RpcResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(RpcError::Handler(format!("route task failed: {}", e))),
        }
    }

    /// Cancel the route's consumer and wait for it to stop.
    pub async fn cancel(self) -> RpcResult<()> {
        if let Err(e) = self.broker.cancel(&self.consumer_tag).await {
            tracing::debug!("Cancel of consumer '{}' failed: {}", self.consumer_tag, e);
        }
        self.join().await
    }

    /// Stop the route immediately.
    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn run_rpc_route(
    mut consumer: Consumer,
    handler: Arc<dyn RequestHandler>,
    broker: Arc<dyn BrokerChannel>,
    route: Arc<RouteConfig>,
    stats: Arc<RouteStats>,
) -> RpcResult<()> {
    let limit = Arc::new(Semaphore::new(route.prefetch));
    let policy = route.response_contains.inbound();

    while let Some(delivery) = consumer.recv().await {
        stats.record_request();
        let request_id = trace::extract_or_generate(&delivery.properties.headers);

        let request = match decode_delivery(&delivery, &policy) {
            Ok(request) => request,
            Err(e) => {
                stats.record_decode_error();
                tracing::warn!(
                    role = "Rpc Server",
                    exchange = %route.exchange,
                    topic = %delivery.routing_key,
                    request_id = %request_id,
                    "Rejecting undecodable request: {}",
                    e
                );
                nack(broker.as_ref(), &delivery, "Rpc Server").await;
                continue;
            }
        };

        let Ok(permit) = limit.clone().acquire_owned().await else {
            break;
        };

        let replier = Replier::bound(
            route.signature.as_str(),
            ReplySource {
                broker: broker.clone(),
                delivery_tag: delivery.delivery_tag,
                exchange: route.exchange.clone(),
                routing_key: delivery.routing_key.clone(),
                correlation_id: delivery.properties.correlation_id.clone(),
                reply_to: delivery.properties.reply_to.clone(),
                request_id: request_id.clone(),
                receive_type: receive_type(&delivery),
                stats: stats.clone(),
            },
        );

        let handler = handler.clone();
        let broker = broker.clone();
        let route = route.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handler.handle(request, replier.clone()).await {
                stats.record_handler_error();
                tracing::error!(
                    role = "Rpc Server",
                    exchange = %route.exchange,
                    topic = %delivery.routing_key,
                    request_id = %request_id,
                    "Handler failed: {:#}",
                    e
                );
                // Disarm so a late reply fails instead of answering
                if replier.take_source().is_some() {
                    nack(broker.as_ref(), &delivery, "Rpc Server").await;
                }
            }
        });
    }

    tracing::debug!(
        role = "Rpc Server",
        exchange = %route.exchange,
        "RPC route on '{}' stopped",
        route.queue
    );
    Ok(())
}

async fn run_route(
    mut consumer: Consumer,
    handler: Arc<dyn MessageHandler>,
    broker: Arc<dyn BrokerChannel>,
    route: Arc<RouteConfig>,
    stats: Arc<RouteStats>,
) -> RpcResult<()> {
    let policy = route.response_contains.inbound();

    while let Some(delivery) = consumer.recv().await {
        stats.record_request();
        let request_id = trace::extract_or_generate(&delivery.properties.headers);

        let result = match decode_delivery(&delivery, &policy) {
            Ok(message) => handler.handle(message).await.map_err(|e| {
                stats.record_handler_error();
                RpcError::Handler(format!("{:#}", e))
            }),
            Err(e) => {
                stats.record_decode_error();
                Err(e)
            }
        };

        match result {
            Ok(()) => {
                if !route.no_ack {
                    broker.ack(delivery.delivery_tag).await?;
                }
                stats.record_reply();
            }
            Err(e) => {
                tracing::error!(
                    role = "Server",
                    exchange = %route.exchange,
                    topic = %delivery.routing_key,
                    request_id = %request_id,
                    "Consumer failed: {}",
                    e
                );
                if !route.no_ack {
                    nack(broker.as_ref(), &delivery, "Server").await;
                }
                if let Err(cancel_err) = broker.cancel(consumer.tag()).await {
                    tracing::debug!(
                        "Cancel of consumer '{}' failed: {}",
                        consumer.tag(),
                        cancel_err
                    );
                }
                return Err(e);
            }
        }
    }

    tracing::debug!(
        role = "Server",
        exchange = %route.exchange,
        "Route on '{}' stopped",
        route.queue
    );
    Ok(())
}

/// Reject a delivery without requeue, logging failures.
async fn nack(broker: &dyn BrokerChannel, delivery: &Delivery, role: &'static str) {
    if let Err(e) = broker.nack(delivery.delivery_tag, false).await {
        tracing::warn!(
            role,
            topic = %delivery.routing_key,
            "Failed to nack delivery {}: {}",
            delivery.delivery_tag,
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, OutboundMessage};
    use crate::types::MessageProperties;

    fn request(body: &str) -> OutboundMessage {
        let mut properties = MessageProperties {
            correlation_id: Some("c.1".into()),
            reply_to: Some("replies".into()),
            ..Default::default()
        };
        properties
            .headers
            .insert(crate::types::RECEIVE_TYPE_HEADER.into(), "text".into());
        OutboundMessage {
            body: body.as_bytes().to_vec(),
            properties,
        }
    }

    #[tokio::test]
    async fn test_register_declares_topology() {
        let broker = Arc::new(MemoryBroker::new());
        let server = RpcServer::new(broker.clone(), "test");

        let route = server
            .register_rpc_route(
                |_request: ResponseView, _reply: Replier| async move { anyhow::Ok(()) },
                RouteConfig::new("testExchange", "testServerQueue", "*.15"),
            )
            .await
            .unwrap();

        assert!(broker.has_exchange("testExchange"));
        assert_eq!(broker.consumer_count("testServerQueue"), Some(1));
        assert!(server
            .topology()
            .contains(&TopologyKey::binding("testExchange", "testServerQueue", "*.15")));
        assert_eq!(route.queue(), "testServerQueue");
    }

    #[tokio::test]
    async fn test_invalid_route_rejected() {
        let server = RpcServer::new(Arc::new(MemoryBroker::new()), "test");
        let err = server
            .register_rpc_route(
                |_request: ResponseView, _reply: Replier| async move { anyhow::Ok(()) },
                RouteConfig::new("ex", "", "k"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Config(_)));
    }

    #[tokio::test]
    async fn test_handler_error_rejects_and_continues() {
        let broker = Arc::new(MemoryBroker::new());
        let server = RpcServer::new(broker.clone(), "test");
        let route = server
            .register_rpc_route(
                |request: ResponseView, _reply: Replier| async move {
                    match request.content.as_ref().and_then(|c| c.as_text()) {
                        Some("boom") => anyhow::bail!("handler exploded"),
                        _ => anyhow::Ok(()),
                    }
                },
                RouteConfig::new("ex", "q", "k"),
            )
            .await
            .unwrap();

        broker.publish("ex", "k", request("boom")).await.unwrap();
        broker.publish("ex", "k", request("fine")).await.unwrap();

        for _ in 0..100 {
            if route.stats().requests_received == 2 && broker.stats().nacks == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let snap = route.stats();
        assert_eq!(snap.requests_received, 2);
        assert_eq!(snap.handler_errors, 1);
        assert_eq!(broker.stats().nacks, 1);
        assert!(!route.is_finished());

        route.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_plain_route_error_stops_consumer() {
        let broker = Arc::new(MemoryBroker::new());
        let server = RpcServer::new(broker.clone(), "test");
        let route = server
            .register_route(
                |_message: ResponseView| async move {
                    Err::<(), _>(anyhow::anyhow!("cannot handle"))
                },
                RouteConfig::new("events", "event-queue", "user.#"),
            )
            .await
            .unwrap();

        broker
            .publish("events", "user.created", request("x"))
            .await
            .unwrap();

        let err = route.join().await.unwrap_err();
        assert!(matches!(err, RpcError::Handler(_)));
        assert!(err.to_string().contains("cannot handle"));
        assert_eq!(broker.stats().nacks, 1);
        assert_eq!(broker.consumer_count("event-queue"), Some(0));
    }

    #[tokio::test]
    async fn test_plain_route_acks_on_success() {
        let broker = Arc::new(MemoryBroker::new());
        let server = RpcServer::new(broker.clone(), "test");
        let route = server
            .register_route(
                |_message: ResponseView| async move { anyhow::Ok(()) },
                RouteConfig::new("events", "event-queue", "user.#"),
            )
            .await
            .unwrap();

        broker
            .publish("events", "user.created", request("x"))
            .await
            .unwrap();
        for _ in 0..100 {
            if broker.stats().acks == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(broker.stats().acks, 1);
        assert_eq!(route.stats().replies_sent, 1);

        route.cancel().await.unwrap();
    }
}
