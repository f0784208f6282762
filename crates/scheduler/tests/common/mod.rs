#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use hourglass_core::{
    ConnectionConfig, ExecutionStatus, InvokeParams, Job, LifecycleStatus, SendParams, ServiceDefinition,
};
use hourglass_queue::{OutboundMessage, QueueConsumer, QueueError, QueueMessage, Transports};

pub const QUEUE_URL: &str = "https://sqs.eu-west-1.amazonaws.com/123/workers";

pub fn queue_target() -> ServiceDefinition {
    ServiceDefinition::queue(QUEUE_URL)
}

pub fn send_params() -> SendParams {
    SendParams {
        queue_url: QUEUE_URL.into(),
        message_group_id: None,
        delay_seconds: None,
    }
}

/// A live, idle, due job row.
pub fn job_row(id: i64, name: &str, now: DateTime<Utc>) -> Job {
    Job {
        id,
        name: name.to_string(),
        channel: None,
        interval: "*/5 * * * *".to_string(),
        last_run: None,
        next_run: Some(now),
        timeout: 900,
        input: None,
        retries: 0,
        last_duration: None,
        last_error: None,
        last_completed: None,
        last_failed: None,
        parameters: serde_json::json!({}),
        auto_remove: false,
        executor_count: 0,
        execution_status: ExecutionStatus::Active,
        status: LifecycleStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

/// Poll `check` every 10ms for up to five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub function_name: String,
    pub payload: String,
}

/// Records every dispatch; fails sends whose body contains any of `fail_on`.
#[derive(Default)]
pub struct RecordingTransports {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub invoked: Mutex<Vec<Invocation>>,
    pub fail_on: Vec<String>,
}

impl RecordingTransports {
    pub fn failing_on(markers: &[&str]) -> Self {
        Self {
            fail_on: markers.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn invoked(&self) -> Vec<Invocation> {
        self.invoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transports for RecordingTransports {
    async fn send_message(&self, _conn: &ConnectionConfig, message: OutboundMessage) -> Result<(), QueueError> {
        if self.fail_on.iter().any(|m| message.body.contains(m.as_str())) {
            return Err(QueueError::Send(format!("refused: {}", message.body)));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn invoke_async(
        &self,
        _conn: &ConnectionConfig,
        params: &InvokeParams,
        payload: String,
    ) -> Result<(), QueueError> {
        if self.fail_on.iter().any(|m| params.function_name.contains(m.as_str())) {
            return Err(QueueError::Invoke(format!("refused: {}", params.function_name)));
        }
        self.invoked.lock().unwrap().push(Invocation {
            function_name: params.function_name.clone(),
            payload,
        });
        Ok(())
    }
}

/// In-memory queue: hands out queued messages once, records acks and nacks.
#[derive(Default)]
pub struct MemoryQueue {
    pub pending: Mutex<VecDeque<QueueMessage>>,
    pub acked: Mutex<Vec<String>>,
    pub nacked: Mutex<Vec<String>>,
}

impl MemoryQueue {
    pub fn with_messages(messages: Vec<QueueMessage>) -> Self {
        Self {
            pending: Mutex::new(messages.into()),
            ..Default::default()
        }
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<String> {
        self.nacked.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let batch: Vec<QueueMessage> = {
            let mut pending = self.pending.lock().unwrap();
            let n = (max_messages as usize).min(pending.len());
            pending.drain(..n).collect()
        };
        if batch.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(batch)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.acked.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.nacked.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }
}
