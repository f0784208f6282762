//! Dispatch transports (SQS send, Lambda async invoke) and the inbound side:
//! SQS consumption and decoding of deliveries into worker runs.

pub mod client;
pub mod consumer;
pub mod error;
pub mod lambda;
pub mod parser;
pub mod sqs;
pub mod transports;

pub use consumer::{QueueConsumer, QueueMessage};
pub use error::QueueError;
pub use parser::{parse_delivery, Delivery, RunMode};
pub use sqs::SqsConsumer;
pub use transports::{AwsTransports, OutboundMessage, Routing, Transports};
