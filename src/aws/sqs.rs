//! SQS adapter

use async_trait::async_trait;
use aws_sdk_sqs::types as sdk;
use aws_sdk_sqs::Client;

use super::provider_error;
use crate::api::types::{DeleteEntry, QueueMessage};
use crate::api::SqsApi;
use crate::{Error, Result};

/// [`SqsApi`] backed by the AWS SDK
pub struct SqsClient {
    inner: Client,
}

impl SqsClient {
    /// Create a client from the shared configuration
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            inner: Client::new(config),
        }
    }
}

#[async_trait]
impl SqsApi for SqsClient {
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: i32,
        visibility_timeout: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>> {
        let output = self
            .inner
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages)
            .visibility_timeout(visibility_timeout)
            .wait_time_seconds(wait_time_seconds)
            .send()
            .await
            .map_err(|e| provider_error("failed to receive messages", e))?;

        Ok(output
            .messages()
            .iter()
            .map(|message| QueueMessage {
                message_id: message.message_id().unwrap_or_default().to_string(),
                body: message.body().unwrap_or_default().to_string(),
                receipt_handle: message.receipt_handle().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn delete_message_batch(&self, queue_url: &str, entries: &[DeleteEntry]) -> Result<()> {
        let entries = entries
            .iter()
            .map(|entry| {
                sdk::DeleteMessageBatchRequestEntry::builder()
                    .id(&entry.id)
                    .receipt_handle(&entry.receipt_handle)
                    .build()
                    .map_err(|e| {
                        Error::validation(format!("invalid delete entry \"{}\": {e}", entry.id))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        self.inner
            .delete_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| provider_error("failed to delete messages", e))?;
        Ok(())
    }
}
