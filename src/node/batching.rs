//! Bounded inbound queue that coalesces client writes.
//!
//! Producers enqueue through [`BatchingMessageHandler`]; a single
//! [`BatchConsumer`] drains the queue and dispatches to the wrapped
//! handler. Within one drained batch every `NewEntryRequest` is folded
//! into one `NewEntryBatch` that is dispatched after all other messages
//! of that batch.

use super::MessageHandler;
use crate::config::Config;
use crate::messages::{MessageKind, NewEntryBatch, RaftMessage};
use crate::store::LocalDatabase;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct BatchingMessageHandler<H: MessageHandler> {
    inner: Arc<H>,
    queue: mpsc::Sender<RaftMessage>,
}

pub struct BatchConsumer<H: MessageHandler> {
    inner: Arc<H>,
    queue: mpsc::Receiver<RaftMessage>,
    database: Arc<dyn LocalDatabase>,
    max_batch: usize,
    poll_timeout: Duration,
}

impl<H: MessageHandler> BatchingMessageHandler<H> {
    pub fn new(
        inner: Arc<H>,
        database: Arc<dyn LocalDatabase>,
        config: &Config,
    ) -> (Self, BatchConsumer<H>) {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let consumer = BatchConsumer {
            inner: Arc::clone(&inner),
            queue: rx,
            database,
            max_batch: config.max_batch.max(1),
            poll_timeout: config.poll_timeout,
        };
        (Self { inner, queue: tx }, consumer)
    }

    /// Creates the handler and runs its consumer on a new task.
    pub fn spawn(
        inner: Arc<H>,
        database: Arc<dyn LocalDatabase>,
        config: &Config,
    ) -> (Self, JoinHandle<()>)
    where
        H: 'static,
    {
        let (handler, consumer) = Self::new(inner, database, config);
        (handler, tokio::spawn(consumer.run()))
    }
}

/// Logs when an enqueue is abandoned before completing.
struct EnqueueGuard {
    kind: MessageKind,
    completed: bool,
}

impl Drop for EnqueueGuard {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(
                kind = ?self.kind,
                "Not expecting to be interrupted, message was not enqueued"
            );
        }
    }
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for BatchingMessageHandler<H> {
    async fn validate(&self, message: &RaftMessage) -> bool {
        self.inner.validate(message).await
    }

    async fn handle(&self, message: RaftMessage) {
        let mut guard = EnqueueGuard {
            kind: message.kind(),
            completed: false,
        };
        if let Err(e) = self.queue.send(message).await {
            tracing::warn!(
                kind = ?e.0.kind(),
                "Batch consumer has stopped, message dropped"
            );
        }
        guard.completed = true;
    }
}

impl<H: MessageHandler> BatchConsumer<H> {
    /// Drains the queue until every producer handle is dropped.
    pub async fn run(mut self) {
        while self.poll().await {}
        tracing::debug!("Batch consumer stopped");
    }

    /// Waits for and dispatches one batch. Returns `false` once the queue
    /// is closed and empty.
    async fn poll(&mut self) -> bool {
        let first =
            match tokio::time::timeout(self.poll_timeout, self.queue.recv()).await {
                Err(_) => {
                    tracing::trace!("No message within poll timeout");
                    return true;
                }
                Ok(None) => return false,
                Ok(Some(message)) => message,
            };

        if self.queue.is_empty() {
            self.inner.handle(first).await;
            return true;
        }

        let mut batch = vec![first];
        while batch.len() < self.max_batch {
            match self.queue.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }
        self.collate_and_handle(batch).await;
        true
    }

    async fn collate_and_handle(&self, batch: Vec<RaftMessage>) {
        let batch_len = batch.len();
        let mut new_entries: Option<NewEntryBatch> = None;

        for message in batch {
            match message {
                RaftMessage::NewEntryRequest(request) => {
                    new_entries
                        .get_or_insert_with(|| {
                            NewEntryBatch::with_capacity(
                                batch_len,
                                self.database.store_id(),
                            )
                        })
                        .add(request.content);
                }
                other => self.inner.handle(other).await,
            }
        }

        if let Some(new_entries) = new_entries {
            tracing::trace!(entries = new_entries.len(), "Dispatching coalesced writes");
            self.inner
                .handle(RaftMessage::NewEntryBatch(new_entries))
                .await;
        }
    }
}
