//! AWS SQS consumer.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use tracing::{debug, info};

use hourglass_core::config::{AwsConfig, QueueConfig};
use hourglass_core::ConnectionConfig;

use crate::client::sqs_client;
use crate::consumer::{QueueConsumer, QueueMessage};
use crate::error::QueueError;

/// SQS-backed queue consumer.
pub struct SqsConsumer {
    client: Client,
    queue_url: String,
    visibility_timeout_secs: i32,
    wait_time_secs: i32,
}

impl SqsConsumer {
    /// Consumer for the configured default queue.
    pub async fn new(aws: &AwsConfig, queue: &QueueConfig) -> Result<Self, QueueError> {
        let queue_url = queue
            .queue_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| QueueError::NotFound("QUEUE_URL is not configured".into()))?;
        Ok(Self::with_client(
            sqs_client(aws, &ConnectionConfig::default()).await,
            queue_url,
            queue,
        ))
    }

    pub fn with_client(client: Client, queue_url: String, queue: &QueueConfig) -> Self {
        info!(queue_url = %queue_url, "SQS consumer initialized");
        Self {
            client,
            queue_url,
            visibility_timeout_secs: queue.visibility_timeout_secs as i32,
            wait_time_secs: queue.wait_time_secs.min(20) as i32,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl QueueConsumer for SqsConsumer {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        // SQS caps at 10 messages per request.
        let capped = max_messages.clamp(1, 10) as i32;

        debug!(max_messages = capped, "Polling SQS");

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS receive failed: {e:?}")))?;

        let sqs_messages = resp.messages.unwrap_or_default();
        debug!(count = sqs_messages.len(), "Received SQS messages");

        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let receipt_handle = msg
                .receipt_handle()
                .ok_or_else(|| QueueError::Parse("missing receipt handle".into()))?
                .to_string();

            let timestamp = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            let attempt_count = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            let attributes: HashMap<String, String> = msg
                .message_attributes()
                .map(|attrs| {
                    attrs
                        .iter()
                        .filter_map(|(k, v)| v.string_value().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();

            messages.push(QueueMessage {
                id: msg.message_id().unwrap_or("unknown").to_string(),
                body: msg.body().unwrap_or("").to_string(),
                attributes,
                receipt_handle,
                timestamp,
                attempt_count,
            });
        }

        Ok(messages)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "Acking SQS message");

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("SQS delete failed: {e:?}")))?;

        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "Nacking SQS message (visibility=0)");

        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::Provider(format!("SQS visibility change failed: {e:?}")))?;

        Ok(())
    }
}
