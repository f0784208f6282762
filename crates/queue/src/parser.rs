//! Decode inbound messages into [`Delivery`]s.
//!
//! Two shapes arrive on a worker queue:
//! - a scheduler dispatch: no routing attributes, body is a serialized
//!   [`WorkerDefinition`];
//! - a planner fan-out item: `workerName` (and optionally `jobId`,
//!   `parameters`, `mode`) attributes, body is the item.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use hourglass_core::WorkerDefinition;

use crate::consumer::QueueMessage;
use crate::error::QueueError;

pub const ATTR_WORKER_NAME: &str = "workerName";
pub const ATTR_JOB_ID: &str = "jobId";
pub const ATTR_PARAMETERS: &str = "parameters";
pub const ATTR_MODE: &str = "mode";

/// Queue-mode run flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    Planner,
    Executor,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Planner => "PLANNER",
            RunMode::Executor => "EXECUTOR",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLANNER" => Ok(RunMode::Planner),
            "EXECUTOR" => Ok(RunMode::Executor),
            other => Err(QueueError::Parse(format!("unknown run mode '{other}'"))),
        }
    }
}

/// One inbound worker run request.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub definition: WorkerDefinition,
    /// Explicit mode attribute, if any.
    pub mode: Option<RunMode>,
    /// Executor input, if any.
    pub body: Option<String>,
    pub message_id: Option<String>,
    /// Built from routing attributes: only `worker_name`, `id` and
    /// `parameters` are set, the schedule fields are defaults.
    pub routed: bool,
}

impl Delivery {
    pub fn new(definition: WorkerDefinition) -> Self {
        Self {
            definition,
            mode: None,
            body: None,
            message_id: None,
            routed: false,
        }
    }

    /// Decode a function-invocation payload (a serialized [`WorkerDefinition`]).
    pub fn from_payload(payload: &str) -> Result<Self, QueueError> {
        let definition = WorkerDefinition::from_payload(payload)
            .map_err(|e| QueueError::Parse(format!("invalid worker definition: {e}")))?;
        Ok(Self::new(definition))
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn worker_name(&self) -> &str {
        &self.definition.worker_name
    }

    pub fn job_id(&self) -> Option<i64> {
        self.definition.id
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.definition.parameters
    }

    /// Explicit mode wins; otherwise a body means an executor run.
    pub fn run_mode(&self) -> RunMode {
        match (self.mode, &self.body) {
            (Some(mode), _) => mode,
            (None, Some(_)) => RunMode::Executor,
            (None, None) => RunMode::Planner,
        }
    }
}

/// Decode a queue message into a [`Delivery`].
pub fn parse_delivery(msg: &QueueMessage) -> Result<Delivery, QueueError> {
    let Some(worker_name) = msg.attribute(ATTR_WORKER_NAME) else {
        let mut delivery = Delivery::from_payload(&msg.body)
            .map_err(|e| QueueError::Parse(format!("message {}: {e}", msg.id)))?;
        delivery.message_id = Some(msg.id.clone());
        return Ok(delivery);
    };

    let mut definition = WorkerDefinition::new(worker_name);

    definition.id = msg
        .attribute(ATTR_JOB_ID)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| QueueError::Parse(format!("message {}: invalid jobId '{s}'", msg.id)))
        })
        .transpose()?;

    if let Some(raw) = msg.attribute(ATTR_PARAMETERS).filter(|s| !s.is_empty()) {
        definition.parameters = serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(message_id = %msg.id, error = %e, "Unparseable parameters attribute; using raw string");
            serde_json::Value::String(raw.to_string())
        });
    }

    let mode = msg.attribute(ATTR_MODE).map(str::parse::<RunMode>).transpose()?;
    let body = Some(msg.body.clone()).filter(|b| !b.is_empty());

    Ok(Delivery {
        definition,
        mode,
        body,
        message_id: Some(msg.id.clone()),
        routed: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scheduler_dispatch_without_attributes() {
        let mut def = WorkerDefinition::new("digest");
        def.id = Some(7);
        def.interval = "*/5 * * * *".into();
        let msg = QueueMessage::new("m-1", def.to_payload().unwrap());

        let delivery = parse_delivery(&msg).unwrap();
        assert_eq!(delivery.worker_name(), "digest");
        assert_eq!(delivery.job_id(), Some(7));
        assert_eq!(delivery.definition.interval, "*/5 * * * *");
        assert_eq!(delivery.run_mode(), RunMode::Planner);
        assert!(!delivery.routed);
    }

    #[test]
    fn fan_out_item_with_attributes() {
        let msg = QueueMessage::new("m-2", r#"{"user":3}"#)
            .with_attribute(ATTR_WORKER_NAME, "digest")
            .with_attribute(ATTR_JOB_ID, "7")
            .with_attribute(ATTR_PARAMETERS, r#"{"tenant":"acme"}"#);

        let delivery = parse_delivery(&msg).unwrap();
        assert_eq!(delivery.job_id(), Some(7));
        assert_eq!(delivery.parameters(), &json!({"tenant": "acme"}));
        assert_eq!(delivery.body.as_deref(), Some(r#"{"user":3}"#));
        assert_eq!(delivery.run_mode(), RunMode::Executor);
        assert!(delivery.routed);
    }

    #[test]
    fn explicit_mode_wins_over_body() {
        let msg = QueueMessage::new("m-3", "payload")
            .with_attribute(ATTR_WORKER_NAME, "digest")
            .with_attribute(ATTR_MODE, "PLANNER");
        assert_eq!(parse_delivery(&msg).unwrap().run_mode(), RunMode::Planner);
    }

    #[test]
    fn empty_body_with_attributes_is_planner() {
        let msg = QueueMessage::new("m-4", "").with_attribute(ATTR_WORKER_NAME, "digest");
        let delivery = parse_delivery(&msg).unwrap();
        assert_eq!(delivery.body, None);
        assert_eq!(delivery.run_mode(), RunMode::Planner);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_delivery(&QueueMessage::new("m-5", "not json")).is_err());

        let bad_id = QueueMessage::new("m-6", "x")
            .with_attribute(ATTR_WORKER_NAME, "digest")
            .with_attribute(ATTR_JOB_ID, "seven");
        assert!(parse_delivery(&bad_id).is_err());

        let bad_mode = QueueMessage::new("m-7", "x")
            .with_attribute(ATTR_WORKER_NAME, "digest")
            .with_attribute(ATTR_MODE, "SOMETIMES");
        assert!(parse_delivery(&bad_mode).is_err());
    }
}
