use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("{0}")]
    Other(String),
}
