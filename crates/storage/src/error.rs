use thiserror::Error;

use hourglass_core::JobKey;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("core error: {0}")]
    Core(#[from] hourglass_core::CoreError),

    #[error("job not found: {0}")]
    NotFound(JobKey),

    #[error("a live job named '{0}' already exists")]
    Duplicate(String),

    #[error("corrupt job row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },
}
