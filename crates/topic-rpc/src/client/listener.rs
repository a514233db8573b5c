// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reply listener: one consumer per reply queue feeding the pending table.

use super::pending::PendingTable;
use crate::broker::Consumer;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(crate) struct ReplyListener {
    queue: String,
    consumer_tag: String,
    task: JoinHandle<()>,
}

impl ReplyListener {
    /// Start draining `consumer` into `pending` (runs in background)
    pub(crate) fn spawn(mut consumer: Consumer, queue: String, pending: Arc<PendingTable>) -> Self {
        let consumer_tag = consumer.tag().to_string();
        let task_queue = queue.clone();

        let task = tokio::spawn(async move {
            while let Some(delivery) = consumer.recv().await {
                pending.dispatch(&delivery);
            }
            tracing::debug!(
                role = "Rpc Client",
                "Reply listener on '{}' stopped",
                task_queue
            );
        });

        Self {
            queue,
            consumer_tag,
            task,
        }
    }

    pub(crate) fn queue(&self) -> &str {
        &self.queue
    }

    pub(crate) fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// False once the consumer stream ended
    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}
