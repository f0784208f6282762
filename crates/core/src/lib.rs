pub mod config;
pub mod definition;
pub mod error;
pub mod job;
pub mod schedule;
pub mod service;

pub use config::Config;
pub use definition::WorkerDefinition;
pub use error::*;
pub use job::*;
pub use service::*;
