// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending-call table keyed by correlation id.

use crate::broker::Delivery;
use crate::error::RpcResult;
use crate::response::{decode_delivery, ResponseContains, ResponseView};
use crate::types::{header_str, CorrelationId, SIGNATURE_HEADER};
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Lifecycle of an outstanding call.
///
/// `Satisfied` and `TimedOut` are terminal; a terminal call leaves the
/// table and later replies for its correlation id are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Awaiting,
    Satisfied,
    TimedOut,
}

enum ReplySink {
    /// First reply wins
    Single(Option<oneshot::Sender<RpcResult<ResponseView>>>),
    /// Every reply until the deadline, or until all expected signatures
    Many {
        tx: mpsc::UnboundedSender<ResponseView>,
        expected: HashSet<String>,
        seen: HashSet<String>,
    },
}

pub(crate) struct PendingCall {
    sink: ReplySink,
    response_contains: ResponseContains,
    deadline: Instant,
    state: CallState,
}

impl PendingCall {
    pub(crate) fn single(
        tx: oneshot::Sender<RpcResult<ResponseView>>,
        response_contains: ResponseContains,
        deadline: Instant,
    ) -> Self {
        Self {
            sink: ReplySink::Single(Some(tx)),
            response_contains,
            deadline,
            state: CallState::Awaiting,
        }
    }

    pub(crate) fn many(
        tx: mpsc::UnboundedSender<ResponseView>,
        expected: HashSet<String>,
        response_contains: ResponseContains,
        deadline: Instant,
    ) -> Self {
        Self {
            sink: ReplySink::Many {
                tx,
                expected,
                seen: HashSet::new(),
            },
            response_contains,
            deadline,
            state: CallState::Awaiting,
        }
    }

    fn accept(&mut self, delivery: &Delivery) -> CallState {
        let decoded = decode_delivery(delivery, &self.response_contains);

        match &mut self.sink {
            ReplySink::Single(tx) => {
                if let Some(tx) = tx.take() {
                    // Ignore send error - caller may have given up
                    drop(tx.send(decoded));
                }
                self.state = CallState::Satisfied;
            }
            ReplySink::Many { tx, expected, seen } => match decoded {
                Ok(view) => {
                    if let Some(signature) =
                        header_str(&delivery.properties.headers, SIGNATURE_HEADER)
                    {
                        seen.insert(signature.to_string());
                    }
                    drop(tx.send(view));
                    if !expected.is_empty() && expected.is_subset(seen) {
                        self.state = CallState::Satisfied;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        role = "Rpc Client",
                        topic = %delivery.routing_key,
                        "Skipping undecodable reply: {}",
                        e
                    );
                }
            },
        }

        self.state
    }
}

/// Outstanding calls of one client.
#[derive(Default)]
pub(crate) struct PendingTable {
    calls: DashMap<CorrelationId, PendingCall>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a call. It stays in the table until the returned guard drops,
    /// unless a reply or the deadline removes it first.
    #[must_use = "the call leaves the table when the guard drops"]
    pub(crate) fn register(&self, id: CorrelationId, call: PendingCall) -> PendingGuard<'_> {
        self.calls.insert(id.clone(), call);
        PendingGuard { table: self, id }
    }

    /// Route a reply to its pending call.
    ///
    /// Returns the call's state after the reply, or `None` when the reply
    /// matched no pending call and was dropped.
    pub(crate) fn dispatch(&self, delivery: &Delivery) -> Option<CallState> {
        let Some(raw) = delivery.properties.correlation_id.as_deref() else {
            tracing::debug!(
                role = "Rpc Client",
                topic = %delivery.routing_key,
                "Dropping reply without correlation id"
            );
            return None;
        };
        let id = CorrelationId::from_wire(raw);

        let state = {
            let Some(mut call) = self.calls.get_mut(&id) else {
                tracing::debug!(
                    role = "Rpc Client",
                    correlation_id = %id,
                    "Dropping reply for unknown or finished call"
                );
                return None;
            };

            if Instant::now() >= call.deadline {
                call.state = CallState::TimedOut;
                tracing::debug!(
                    role = "Rpc Client",
                    correlation_id = %id,
                    "Dropping reply past call deadline"
                );
            } else {
                call.accept(delivery);
            }
            call.state
        };

        if state != CallState::Awaiting {
            // Dropping the sink wakes up the waiting caller
            self.calls.remove(&id);
        }
        Some(state)
    }

    /// Time out a call. Returns false when the call already left the table.
    pub(crate) fn expire(&self, id: &CorrelationId) -> bool {
        self.calls.remove(id).is_some()
    }

    pub(crate) fn remove(&self, id: &CorrelationId) {
        self.calls.remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }

    pub(crate) fn clear(&self) {
        self.calls.clear();
    }
}

/// Releases a call's table slot when the waiting caller goes away.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Payload;
    use crate::types::{MessageProperties, RECEIVE_TYPE_HEADER};
    use std::time::Duration;

    fn reply(correlation_id: Option<&str>, signature: &str, body: &str) -> Delivery {
        let mut properties = MessageProperties {
            correlation_id: correlation_id.map(str::to_string),
            ..Default::default()
        };
        properties
            .headers
            .insert(RECEIVE_TYPE_HEADER.into(), "text".into());
        properties
            .headers
            .insert(SIGNATURE_HEADER.into(), signature.into());
        Delivery {
            delivery_tag: 1,
            exchange: String::new(),
            routing_key: "replies".into(),
            redelivered: false,
            body: body.as_bytes().to_vec(),
            properties,
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_single_reply_resolves_and_leaves_table() {
        let table = PendingTable::new();
        let id = CorrelationId::new("c", 1);
        let (tx, rx) = oneshot::channel();
        let _call = table.register(
            id.clone(),
            PendingCall::single(tx, ResponseContains::all(), deadline()),
        );

        let state = table.dispatch(&reply(Some(id.as_str()), "server", "pong"));
        assert_eq!(state, Some(CallState::Satisfied));
        assert_eq!(table.len(), 0);

        let view = rx.await.unwrap().unwrap();
        assert_eq!(view.content, Some(Payload::Text("pong".into())));
        assert_eq!(view.signature(), Some("server"));

        // Second reply for the same id is dropped
        assert_eq!(
            table.dispatch(&reply(Some(id.as_str()), "server", "again")),
            None
        );
    }

    #[tokio::test]
    async fn test_unknown_and_missing_ids_ignored() {
        let table = PendingTable::new();
        let id = CorrelationId::new("c", 1);
        let (tx, _rx) = oneshot::channel();
        let _call = table.register(
            id,
            PendingCall::single(tx, ResponseContains::default(), deadline()),
        );

        assert_eq!(table.dispatch(&reply(Some("c.999"), "s", "x")), None);
        assert_eq!(table.dispatch(&reply(None, "s", "x")), None);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_many_collects_until_expected_seen() {
        let table = PendingTable::new();
        let id = CorrelationId::new("c", 2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let expected: HashSet<String> = ["server-1", "server-2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let _call = table.register(
            id.clone(),
            PendingCall::many(tx, expected, ResponseContains::all(), deadline()),
        );

        assert_eq!(
            table.dispatch(&reply(Some(id.as_str()), "server-1", "a")),
            Some(CallState::Awaiting)
        );
        assert_eq!(
            table.dispatch(&reply(Some(id.as_str()), "other", "b")),
            Some(CallState::Awaiting)
        );
        assert_eq!(
            table.dispatch(&reply(Some(id.as_str()), "server-2", "c")),
            Some(CallState::Satisfied)
        );
        assert_eq!(table.len(), 0);

        let mut signatures = Vec::new();
        while let Some(view) = rx.recv().await {
            signatures.push(view.signature.unwrap());
        }
        assert_eq!(signatures, vec!["server-1", "other", "server-2"]);
    }

    #[tokio::test]
    async fn test_many_skips_undecodable_reply() {
        let table = PendingTable::new();
        let id = CorrelationId::new("c", 3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _call = table.register(
            id.clone(),
            PendingCall::many(tx, HashSet::new(), ResponseContains::default(), deadline()),
        );

        let mut bad = reply(Some(id.as_str()), "s", "{oops");
        bad.properties
            .headers
            .insert(RECEIVE_TYPE_HEADER.into(), "json".into());
        assert_eq!(table.dispatch(&bad), Some(CallState::Awaiting));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_past_deadline_dropped() {
        let table = PendingTable::new();
        let id = CorrelationId::new("c", 4);
        let (tx, rx) = oneshot::channel();
        let _call = table.register(
            id.clone(),
            PendingCall::single(
                tx,
                ResponseContains::default(),
                Instant::now() + Duration::from_millis(10),
            ),
        );

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(
            table.dispatch(&reply(Some(id.as_str()), "s", "late")),
            Some(CallState::TimedOut)
        );
        assert_eq!(table.len(), 0);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_slot() {
        let table = PendingTable::new();
        let id = CorrelationId::new("c", 6);
        let (tx, rx) = oneshot::channel();
        let call = table.register(
            id.clone(),
            PendingCall::single(tx, ResponseContains::default(), deadline()),
        );
        assert_eq!(table.len(), 1);

        drop(call);
        assert_eq!(table.len(), 0);
        assert!(rx.await.is_err());
        assert_eq!(table.dispatch(&reply(Some(id.as_str()), "s", "late")), None);
    }

    #[tokio::test]
    async fn test_expire_and_clear() {
        let table = PendingTable::new();
        let id = CorrelationId::new("c", 5);
        let (tx, _rx) = oneshot::channel();
        let _call = table.register(
            id.clone(),
            PendingCall::single(tx, ResponseContains::default(), Instant::now()),
        );
        assert!(table.expire(&id));
        assert!(!table.expire(&id));

        let (tx, _rx) = oneshot::channel();
        let _call = table.register(
            id,
            PendingCall::single(tx, ResponseContains::default(), Instant::now()),
        );
        table.clear();
        assert_eq!(table.len(), 0);
    }
}
