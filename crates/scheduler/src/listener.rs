//! Queue consumer loop: poll, decode, run, ack or nack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use hourglass_queue::{parse_delivery, Delivery, QueueConsumer, QueueError, QueueMessage};

use crate::error::WorkerError;

/// Runs one decoded delivery.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), WorkerError>;
}

/// Counts from one processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub acked: usize,
    pub nacked: usize,
    /// Undecodable or unrunnable messages, acked so they are not redelivered.
    pub poisoned: usize,
}

enum Disposition {
    Ack,
    Nack,
    Poison,
}

pub struct QueueListener {
    consumer: Arc<dyn QueueConsumer>,
    max_messages: u32,
    error_backoff: Duration,
}

impl QueueListener {
    pub fn new(consumer: Arc<dyn QueueConsumer>, max_messages: u32) -> Self {
        Self {
            consumer,
            max_messages,
            error_backoff: Duration::from_secs(5),
        }
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Poll once and process whatever arrived.
    pub async fn poll_once(&self, handler: &dyn DeliveryHandler) -> Result<BatchOutcome, QueueError> {
        let messages = self.consumer.poll_batch(self.max_messages).await?;
        Ok(self.process_batch(messages, handler).await)
    }

    /// Process a batch concurrently; one message's failure never affects the others.
    pub async fn process_batch(&self, messages: Vec<QueueMessage>, handler: &dyn DeliveryHandler) -> BatchOutcome {
        let dispositions = join_all(messages.iter().map(|msg| self.process(msg, handler))).await;

        let mut outcome = BatchOutcome::default();
        for disposition in dispositions {
            match disposition {
                Disposition::Ack => outcome.acked += 1,
                Disposition::Nack => outcome.nacked += 1,
                Disposition::Poison => outcome.poisoned += 1,
            }
        }
        outcome
    }

    async fn process(&self, msg: &QueueMessage, handler: &dyn DeliveryHandler) -> Disposition {
        let delivery = match parse_delivery(msg) {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(message_id = %msg.id, error = %e, "undecodable message; dropping");
                self.ack(msg).await;
                return Disposition::Poison;
            }
        };

        let worker = delivery.worker_name().to_string();
        match handler.handle(delivery).await {
            Ok(()) => {
                self.ack(msg).await;
                Disposition::Ack
            }
            Err(e) if e.is_poison() => {
                error!(message_id = %msg.id, worker = %worker, error = %e, "unrunnable message; dropping");
                self.ack(msg).await;
                Disposition::Poison
            }
            Err(e) => {
                warn!(
                    message_id = %msg.id,
                    worker = %worker,
                    attempt = msg.attempt_count,
                    error = %e,
                    "run failed; returning message for redelivery"
                );
                if let Err(e) = self.consumer.nack(&msg.receipt_handle).await {
                    warn!(message_id = %msg.id, error = %e, "nack failed");
                }
                Disposition::Nack
            }
        }
    }

    async fn ack(&self, msg: &QueueMessage) {
        if let Err(e) = self.consumer.ack(&msg.receipt_handle).await {
            warn!(message_id = %msg.id, error = %e, "ack failed");
        }
    }

    /// Consume until `shutdown` is notified. A batch in progress is finished first.
    pub async fn run(&self, handler: Arc<dyn DeliveryHandler>, shutdown: Arc<Notify>) {
        info!(max_messages = self.max_messages, "queue listener started");

        let stop = shutdown.notified();
        tokio::pin!(stop);
        stop.as_mut().enable();

        loop {
            let polled = tokio::select! {
                _ = &mut stop => break,
                polled = self.consumer.poll_batch(self.max_messages) => polled,
            };

            match polled {
                Ok(messages) if messages.is_empty() => {}
                Ok(messages) => {
                    let outcome = self.process_batch(messages, handler.as_ref()).await;
                    debug!(?outcome, "batch processed");
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = self.error_backoff.as_secs(), "poll failed");
                    tokio::select! {
                        _ = &mut stop => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        info!("queue listener stopped");
    }
}
