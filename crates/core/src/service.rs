//! Dispatch targets: where a worker run is started, never what it does.

use serde::{Deserialize, Serialize};

/// Region/endpoint override for the transport client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl ConnectionConfig {
    pub fn is_default(&self) -> bool {
        self.region.is_none() && self.endpoint_url.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendParams {
    pub queue_url: String,
    /// Required by FIFO queues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeParams {
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
}

/// Destination mechanism used to start a worker run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceDefinition {
    Queue {
        #[serde(default)]
        connection_config: ConnectionConfig,
        send_params: SendParams,
    },
    Function {
        #[serde(default)]
        connection_config: ConnectionConfig,
        invoke_params: InvokeParams,
    },
}

impl ServiceDefinition {
    pub fn queue(queue_url: impl Into<String>) -> Self {
        ServiceDefinition::Queue {
            connection_config: ConnectionConfig::default(),
            send_params: SendParams {
                queue_url: queue_url.into(),
                message_group_id: None,
                delay_seconds: None,
            },
        }
    }

    pub fn function(function_name: impl Into<String>) -> Self {
        ServiceDefinition::Function {
            connection_config: ConnectionConfig::default(),
            invoke_params: InvokeParams {
                function_name: function_name.into(),
                qualifier: None,
            },
        }
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        match self {
            ServiceDefinition::Queue { connection_config, .. }
            | ServiceDefinition::Function { connection_config, .. } => connection_config,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceDefinition::Queue { .. } => "QUEUE",
            ServiceDefinition::Function { .. } => "FUNCTION",
        }
    }
}
