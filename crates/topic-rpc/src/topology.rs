// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topology cache.
//!
//! Remembers which exchanges, queues and bindings were already declared so
//! repeated registrations and publishes skip the broker round-trips.
//!
//! Each key owns a [`tokio::sync::OnceCell`]. Concurrent first use of the
//! same key runs the declare/bind sequence once; a failed sequence leaves
//! the cell empty so the next `ensure` retries it.
//!
//! Entries are never invalidated. A broker client that reconnects and loses
//! declared objects behind the cache's back is not detected here.

use crate::broker::{BrokerChannel, ExchangeKind, QueueOptions};
use crate::error::{RpcError, RpcResult};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Exchange, optionally with a queue bound to it by a routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopologyKey {
    pub exchange: String,
    /// Empty for an exchange-only key
    pub queue: String,
    pub routing_key: String,
}

impl TopologyKey {
    /// Key for a bare exchange
    pub fn exchange(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: String::new(),
            routing_key: String::new(),
        }
    }

    /// Key for an exchange plus a queue bound with `routing_key`
    pub fn binding(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn has_queue(&self) -> bool {
        !self.queue.is_empty()
    }
}

/// Per-instance cache of declared topology.
#[derive(Debug, Default)]
pub struct TopologyCache {
    entries: DashMap<TopologyKey, Arc<OnceCell<()>>>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the exchange (and queue + binding) behind `key` unless it
    /// already was.
    pub async fn ensure(&self, broker: &dyn BrokerChannel, key: &TopologyKey) -> RpcResult<()> {
        // Clone the cell out so no map guard is held across the broker calls
        let cell = self.entries.entry(key.clone()).or_default().clone();

        cell.get_or_try_init(|| async {
            broker
                .declare_exchange(&key.exchange, ExchangeKind::Topic)
                .await?;
            if key.has_queue() {
                broker
                    .declare_queue(&key.queue, QueueOptions::durable())
                    .await?;
                broker
                    .bind_queue(&key.queue, &key.exchange, &key.routing_key)
                    .await?;
            }
            tracing::debug!(
                exchange = %key.exchange,
                queue = %key.queue,
                topic = %key.routing_key,
                "Topology declared"
            );
            Ok::<(), RpcError>(())
        })
        .await?;

        Ok(())
    }

    /// Check if `key` has been declared successfully
    pub fn contains(&self, key: &TopologyKey) -> bool {
        self.entries
            .get(key)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Number of declared keys
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
