//! Long polling of the interruption warning queue
//!
//! The poller feeds batches of messages to a handler and deletes whatever the
//! handler acknowledges. It keeps going on handler errors; an interruption
//! warning that failed to process reappears after the visibility timeout.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::api::types::{DeleteEntry, QueueMessage};
use crate::api::SqsApi;
use crate::limits;
use crate::Result;

/// Keep the visibility timeout short so that messages whose drain failed
/// become visible again quickly.
const VISIBILITY_TIMEOUT_SECONDS: i32 = 10;

/// Handler invoked with each received batch; returns the delete
/// acknowledgments for the messages it fully processed.
pub type MessageHandler =
    dyn Fn(Vec<QueueMessage>) -> BoxFuture<'static, Result<Vec<DeleteEntry>>> + Send + Sync;

/// Polls a message queue and routes batches through a handler
#[async_trait]
pub trait QueuePoller: Send + Sync {
    /// Poll until the token is cancelled, logging handler errors and moving on
    async fn poll(&self, token: CancellationToken, handler: &MessageHandler);

    /// Receive a single batch, invoke the handler, and delete its
    /// acknowledgments
    async fn poll_once(&self, handler: &MessageHandler, wait_time_seconds: i32) -> Result<()>;
}

/// [`QueuePoller`] backed by an SQS queue
pub struct SqsQueuePoller<S> {
    queue_url: String,
    sqs: S,
}

impl<S: SqsApi> SqsQueuePoller<S> {
    /// Create a poller bound to the given queue URL
    pub fn new(queue_url: impl Into<String>, sqs: S) -> Self {
        Self {
            queue_url: queue_url.into(),
            sqs,
        }
    }
}

#[async_trait]
impl<S: SqsApi> QueuePoller for SqsQueuePoller<S> {
    async fn poll(&self, token: CancellationToken, handler: &MessageHandler) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                result = self.poll_once(handler, limits::WAIT_TIME_SECONDS_FOR_LONG_POLLING) => {
                    if let Err(err) = result {
                        warn!(error = %err, "Failed to poll the interruption warning queue");
                    }
                }
            }
        }
    }

    async fn poll_once(&self, handler: &MessageHandler, wait_time_seconds: i32) -> Result<()> {
        let messages = self
            .sqs
            .receive_messages(
                &self.queue_url,
                limits::MAX_RECEIVABLE_MESSAGES,
                VISIBILITY_TIMEOUT_SECONDS,
                wait_time_seconds,
            )
            .await?;

        let entries = handler(messages).await?;
        if entries.is_empty() {
            return Ok(());
        }

        self.sqs
            .delete_message_batch(&self.queue_url, &entries)
            .await
    }
}
