//! Outbound dispatch: the [`Transports`] seam and its AWS implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::types::MessageAttributeValue;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use hourglass_core::config::AwsConfig;
use hourglass_core::{ConnectionConfig, InvokeParams, SendParams, WorkerDefinition};

use crate::client::{lambda_client, sqs_client};
use crate::error::QueueError;
use crate::lambda::invoke_event;
use crate::parser::{RunMode, ATTR_JOB_ID, ATTR_MODE, ATTR_PARAMETERS, ATTR_WORKER_NAME};

/// Routing metadata carried as message attributes, separate from the body.
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
    pub worker_name: String,
    pub job_id: Option<i64>,
    pub parameters: Option<serde_json::Value>,
    pub mode: Option<RunMode>,
}

/// A message to send to a queue target.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub send_params: SendParams,
    pub routing: Option<Routing>,
    pub body: String,
}

impl OutboundMessage {
    /// Scheduler dispatch: the serialized definition, no routing attributes.
    pub fn dispatch(send_params: SendParams, definition: &WorkerDefinition) -> Result<Self, QueueError> {
        let body = definition
            .to_payload()
            .map_err(|e| QueueError::Send(format!("cannot serialize {}: {e}", definition.worker_name)))?;
        Ok(Self {
            send_params,
            routing: None,
            body,
        })
    }

    /// Planner fan-out item addressed to the executor side of `definition`'s worker.
    pub fn item(send_params: SendParams, definition: &WorkerDefinition, body: String) -> Self {
        Self {
            send_params,
            routing: Some(Routing {
                worker_name: definition.worker_name.clone(),
                job_id: definition.id,
                parameters: Some(definition.parameters.clone()),
                mode: Some(RunMode::Executor),
            }),
            body,
        }
    }

    /// String attributes as they appear on the wire.
    pub fn attributes(&self) -> Vec<(&'static str, &'static str, String)> {
        let Some(routing) = &self.routing else {
            return Vec::new();
        };
        let mut attrs = vec![(ATTR_WORKER_NAME, "String", routing.worker_name.clone())];
        if let Some(id) = routing.job_id {
            attrs.push((ATTR_JOB_ID, "Number", id.to_string()));
        }
        if let Some(params) = &routing.parameters {
            attrs.push((ATTR_PARAMETERS, "String", params.to_string()));
        }
        if let Some(mode) = routing.mode {
            attrs.push((ATTR_MODE, "String", mode.as_str().to_string()));
        }
        attrs
    }
}

/// Starts worker runs on a queue or an async function.
#[async_trait]
pub trait Transports: Send + Sync {
    async fn send_message(&self, conn: &ConnectionConfig, message: OutboundMessage) -> Result<(), QueueError>;

    /// Fire-and-forget invocation; resolves when the invoke is accepted.
    async fn invoke_async(
        &self,
        conn: &ConnectionConfig,
        params: &InvokeParams,
        payload: String,
    ) -> Result<(), QueueError>;
}

/// [`Transports`] over `aws-sdk-sqs` and `aws-sdk-lambda`.
///
/// One client per distinct [`ConnectionConfig`], built lazily.
pub struct AwsTransports {
    aws: AwsConfig,
    sqs: Mutex<HashMap<ConnectionConfig, aws_sdk_sqs::Client>>,
    lambda: Mutex<HashMap<ConnectionConfig, aws_sdk_lambda::Client>>,
}

impl AwsTransports {
    pub fn new(aws: AwsConfig) -> Self {
        Self {
            aws,
            sqs: Mutex::new(HashMap::new()),
            lambda: Mutex::new(HashMap::new()),
        }
    }

    async fn sqs(&self, conn: &ConnectionConfig) -> aws_sdk_sqs::Client {
        let mut clients = self.sqs.lock().await;
        if let Some(client) = clients.get(conn) {
            return client.clone();
        }
        let client = sqs_client(&self.aws, conn).await;
        clients.insert(conn.clone(), client.clone());
        client
    }

    async fn lambda(&self, conn: &ConnectionConfig) -> aws_sdk_lambda::Client {
        let mut clients = self.lambda.lock().await;
        if let Some(client) = clients.get(conn) {
            return client.clone();
        }
        let client = lambda_client(&self.aws, conn).await;
        clients.insert(conn.clone(), client.clone());
        client
    }
}

#[async_trait]
impl Transports for AwsTransports {
    async fn send_message(&self, conn: &ConnectionConfig, message: OutboundMessage) -> Result<(), QueueError> {
        let client = self.sqs(conn).await;
        let params = &message.send_params;

        let mut req = client
            .send_message()
            .queue_url(&params.queue_url)
            .message_body(&message.body)
            .set_delay_seconds(params.delay_seconds);

        if let Some(group) = &params.message_group_id {
            req = req
                .message_group_id(group)
                .message_deduplication_id(Uuid::new_v4().to_string());
        }

        for (name, data_type, value) in message.attributes() {
            let attr = MessageAttributeValue::builder()
                .data_type(data_type)
                .string_value(value)
                .build()
                .map_err(|e| QueueError::Send(format!("invalid attribute {name}: {e}")))?;
            req = req.message_attributes(name, attr);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| QueueError::Send(format!("SQS send to {} failed: {e:?}", params.queue_url)))?;

        debug!(
            queue_url = %params.queue_url,
            message_id = resp.message_id().unwrap_or("unknown"),
            "SQS message sent"
        );
        Ok(())
    }

    async fn invoke_async(
        &self,
        conn: &ConnectionConfig,
        params: &InvokeParams,
        payload: String,
    ) -> Result<(), QueueError> {
        let client = self.lambda(conn).await;
        invoke_event(&client, params, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn send_params() -> SendParams {
        SendParams {
            queue_url: "https://sqs/1/digest".into(),
            message_group_id: None,
            delay_seconds: None,
        }
    }

    #[test]
    fn dispatch_has_no_attributes() {
        let mut def = WorkerDefinition::new("digest");
        def.id = Some(3);
        let msg = OutboundMessage::dispatch(send_params(), &def).unwrap();
        assert!(msg.attributes().is_empty());
        assert!(msg.body.contains(r#""workerName":"digest""#));
    }

    #[test]
    fn item_carries_routing_attributes() {
        let mut def = WorkerDefinition::new("digest");
        def.id = Some(3);
        def.parameters = json!({"tenant": "acme"});

        let msg = OutboundMessage::item(send_params(), &def, r#"{"user":1}"#.into());
        let attrs = msg.attributes();
        assert_eq!(attrs[0], (ATTR_WORKER_NAME, "String", "digest".to_string()));
        assert_eq!(attrs[1], (ATTR_JOB_ID, "Number", "3".to_string()));
        assert_eq!(attrs[2], (ATTR_PARAMETERS, "String", r#"{"tenant":"acme"}"#.to_string()));
        assert_eq!(attrs[3], (ATTR_MODE, "String", "EXECUTOR".to_string()));
    }
}
