// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process topic broker.
//!
//! Implements [`BrokerChannel`] with AMQP-like semantics: topic, direct and
//! fanout exchanges, a default exchange addressing queues by name,
//! round-robin dispatch across a queue's consumers, manual ack/nack with
//! requeue, and buffering until a consumer attaches.
//!
//! Call counters ([`BrokerStats`]), one-shot failure injection
//! ([`MemoryBroker::fail_next`]) and artificial topology latency
//! ([`MemoryBroker::with_latency`]) make broker interactions observable
//! in tests.

use super::{
    topic_matches, BrokerChannel, BrokerError, ConsumeOptions, Consumer, Delivery, ExchangeKind,
    OutboundMessage, QueueOptions,
};
use crate::types::MessageProperties;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Broker operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOp {
    DeclareExchange,
    DeclareQueue,
    BindQueue,
    Publish,
    Consume,
    Ack,
    Nack,
}

/// Successful broker calls, by operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub exchange_declares: u64,
    pub queue_declares: u64,
    pub binds: u64,
    pub publishes: u64,
    pub deliveries: u64,
    pub acks: u64,
    pub nacks: u64,
    /// Published messages that matched no queue
    pub unroutable: u64,
}

/// In-process broker. Clones share the same broker state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<State>>,
    latency: Duration,
}

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    properties: MessageProperties,
    redelivered: bool,
}

struct ConsumerSlot {
    tag: String,
    no_ack: bool,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct QueueState {
    options: QueueOptions,
    backlog: VecDeque<Message>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
}

struct Binding {
    exchange: String,
    queue: String,
    pattern: String,
}

struct Unacked {
    queue: String,
    message: Message,
}

#[derive(Default)]
struct State {
    closed: bool,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, Unacked>,
    next_delivery_tag: u64,
    next_consumer_tag: u64,
    next_queue_id: u64,
    stats: BrokerStats,
    fail_next: HashSet<BrokerOp>,
}

impl State {
    fn check(&mut self, op: BrokerOp) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if self.fail_next.remove(&op) {
            return Err(BrokerError::Rejected(format!("injected {:?} failure", op)));
        }
        Ok(())
    }

    /// Queues a message published to `exchange` with `routing_key` lands in.
    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BrokerError> {
        if exchange.is_empty() {
            return Ok(if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }

        let kind = *self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;

        let mut queues: Vec<String> = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.exchange == exchange) {
            let hit = match kind {
                ExchangeKind::Topic => topic_matches(&binding.pattern, routing_key),
                ExchangeKind::Direct => binding.pattern == routing_key,
                ExchangeKind::Fanout => true,
            };
            if hit && !queues.contains(&binding.queue) {
                queues.push(binding.queue.clone());
            }
        }
        Ok(queues)
    }

    /// Hand a message to the next live consumer, or buffer it.
    fn enqueue(&mut self, queue_name: &str, message: Message) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        while !queue.consumers.is_empty() {
            let idx = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = idx + 1;

            self.next_delivery_tag += 1;
            let delivery_tag = self.next_delivery_tag;
            let delivery = Delivery {
                delivery_tag,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                body: message.body.clone(),
                properties: message.properties.clone(),
            };

            let slot = &queue.consumers[idx];
            if slot.tx.send(delivery).is_ok() {
                self.stats.deliveries += 1;
                if !slot.no_ack {
                    self.unacked.insert(
                        delivery_tag,
                        Unacked {
                            queue: queue_name.to_string(),
                            message,
                        },
                    );
                }
                return;
            }

            // Receiver dropped without cancelling
            queue.consumers.remove(idx);
        }

        queue.backlog.push_back(message);
    }

    fn remove_queue(&mut self, name: &str) {
        self.queues.remove(name);
        self.bindings.retain(|b| b.queue != name);
    }
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker whose declare/bind calls take `latency` to complete
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::default(),
            latency,
        }
    }

    /// Snapshot of call counters
    pub fn stats(&self) -> BrokerStats {
        self.inner.lock().stats.clone()
    }

    /// Make the next call of `op` fail with [`BrokerError::Rejected`]
    pub fn fail_next(&self, op: BrokerOp) {
        self.inner.lock().fail_next.insert(op);
    }

    /// Check if a queue exists
    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.lock().queues.contains_key(name)
    }

    /// Check if an exchange exists
    pub fn has_exchange(&self, name: &str) -> bool {
        self.inner.lock().exchanges.contains_key(name)
    }

    /// Messages buffered on a queue waiting for a consumer
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.inner.lock().queues.get(name).map(|q| q.backlog.len())
    }

    /// Consumers attached to a queue
    pub fn consumer_count(&self, name: &str) -> Option<usize> {
        self.inner.lock().queues.get(name).map(|q| q.consumers.len())
    }

    /// Deliveries awaiting ack/nack
    pub fn unacked_count(&self) -> usize {
        self.inner.lock().unacked.len()
    }

    async fn topology_delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryBroker {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.topology_delay().await;

        let mut state = self.inner.lock();
        state.check(BrokerOp::DeclareExchange)?;
        if let Some(existing) = state.exchanges.get(name) {
            if *existing != kind {
                return Err(BrokerError::ExchangeKindMismatch {
                    name: name.to_string(),
                    existing: *existing,
                });
            }
        } else {
            state.exchanges.insert(name.to_string(), kind);
        }
        state.stats.exchange_declares += 1;
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<String, BrokerError> {
        self.topology_delay().await;

        let mut state = self.inner.lock();
        state.check(BrokerOp::DeclareQueue)?;
        let name = if name.is_empty() {
            state.next_queue_id += 1;
            format!("amq.gen-{}", state.next_queue_id)
        } else {
            name.to_string()
        };
        state.queues.entry(name.clone()).or_insert_with(|| QueueState {
            options,
            backlog: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
        });
        state.stats.queue_declares += 1;
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.topology_delay().await;

        let mut state = self.inner.lock();
        state.check(BrokerOp::BindQueue)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::ExchangeNotFound(exchange.to_string()));
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.pattern == routing_key);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                pattern: routing_key.to_string(),
            });
        }
        state.stats.binds += 1;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        state.check(BrokerOp::Publish)?;

        let targets = state.route(exchange, routing_key)?;
        state.stats.publishes += 1;
        if targets.is_empty() {
            state.stats.unroutable += 1;
            tracing::debug!(
                "MemoryBroker: unroutable message on exchange '{}' key '{}'",
                exchange,
                routing_key
            );
            return Ok(());
        }

        let message = Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: message.body,
            properties: message.properties,
            redelivered: false,
        };
        for queue in targets {
            state.enqueue(&queue, message.clone());
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Consumer, BrokerError> {
        let mut state = self.inner.lock();
        state.check(BrokerOp::Consume)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }

        state.next_consumer_tag += 1;
        let tag = format!("ctag-{}", state.next_consumer_tag);
        let (tx, rx) = mpsc::unbounded_channel();

        let backlog: Vec<Message> = match state.queues.get_mut(queue) {
            Some(queue_state) => {
                queue_state.consumers.push(ConsumerSlot {
                    tag: tag.clone(),
                    no_ack: options.no_ack,
                    tx,
                });
                queue_state.backlog.drain(..).collect()
            }
            None => Vec::new(),
        };
        for message in backlog {
            state.enqueue(queue, message);
        }

        Ok(Consumer::new(tag, rx))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        state.check(BrokerOp::Ack)?;
        state
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        state.stats.acks += 1;
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        state.check(BrokerOp::Nack)?;
        let Unacked { queue, mut message } = state
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        state.stats.nacks += 1;
        if requeue {
            message.redelivered = true;
            state.enqueue(&queue, message);
        }
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }

        let mut emptied = None;
        let mut found = false;
        for (name, queue) in state.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|slot| slot.tag != consumer_tag);
            if queue.consumers.len() < before {
                found = true;
                if queue.consumers.is_empty() && queue.options.auto_delete {
                    emptied = Some(name.clone());
                }
                break;
            }
        }

        if !found {
            return Err(BrokerError::UnknownConsumer(consumer_tag.to_string()));
        }
        if let Some(name) = emptied {
            state.remove_queue(&name);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        state.closed = true;
        for queue in state.queues.values_mut() {
            queue.consumers.clear();
        }
        Ok(())
    }
}
