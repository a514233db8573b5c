// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! topic-rpc: Request/Reply over topic-based message brokers
//!
//! Layers an RPC abstraction on top of a publish/subscribe broker with
//! topic exchanges (AMQP-style routing keys and `*` / `#` bindings).
//!
//! # Overview
//!
//! - **Clients** publish a request to an exchange with a routing key and
//!   wait for one reply ([`RpcClient::call`]) or collect every reply that
//!   arrives before a deadline ([`RpcClient::call_many`]).
//! - **Servers** bind a queue to a routing pattern and answer through a
//!   one-shot [`Replier`] that publishes a correlated reply and then
//!   acknowledges the request.
//! - A per-instance [`TopologyCache`] makes exchange/queue/binding
//!   declaration idempotent, including under concurrent first use.
//!
//! # Architecture
//!
//! ```text
//! RpcClient --ensure--> TopologyCache --declare/bind--> BrokerChannel
//!     |                                                     ^   |
//!     +--publish request (correlation id, reply-to)---------+   |
//!     ^                                                         v
//! PendingTable <--dispatch-- reply listener <--consume-- reply queue
//!
//! RpcServer --consume--> route queue --> RequestHandler(request, Replier)
//!                                          Replier --publish reply + ack-->
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use topic_rpc::{
//!     CallOptions, ClientConfig, MemoryBroker, Payload, Replier, ResponseView, RouteConfig,
//!     RpcClient, RpcServer,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Arc::new(MemoryBroker::new());
//!
//! let server = RpcServer::new(broker.clone(), "echo-server");
//! server
//!     .register_rpc_route(
//!         |request: ResponseView, reply: Replier| async move {
//!             reply.reply(request.content.unwrap_or(Payload::Text(String::new()))).await?;
//!             anyhow::Ok(())
//!         },
//!         RouteConfig::new("calc", "calc-requests", "calc.*").signature("echo"),
//!     )
//!     .await?;
//!
//! let client = RpcClient::new(broker, ClientConfig::default());
//! let view = client
//!     .call(
//!         serde_json::json!({"op": "add"}),
//!         CallOptions::new("calc", "calc.add").timeout(Duration::from_secs(2)),
//!     )
//!     .await?;
//! println!("{:?}", view.content);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod response;
pub mod server;
pub mod topology;
pub mod trace;
pub mod types;

pub use broker::{
    topic_matches, BrokerChannel, BrokerError, BrokerOp, BrokerStats, ConsumeOptions, Consumer,
    Delivery, ExchangeKind, MemoryBroker, OutboundMessage, QueueOptions,
};
pub use client::{CallOptions, CallState, RpcClient};
pub use codec::{Payload, PayloadType};
pub use config::{ClientConfig, ConfigError, RouteConfig, RpcConfig};
pub use error::{RpcError, RpcResult};
pub use response::{ResponseContains, ResponseView};
pub use server::{
    MessageHandler, Replier, RequestHandler, RouteHandle, RouteStats, RouteStatsSnapshot,
    RpcServer,
};
pub use topology::{TopologyCache, TopologyKey};
pub use types::{CorrelationId, HeaderValue, Headers, MessageProperties};
