//! Queue and transport error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("send error: {0}")]
    Send(String),

    #[error("invoke error: {0}")]
    Invoke(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(String),
}
