//! Persistent job store: the schedule state the lifecycle engine reads and
//! writes, with exclusive (row-locked) reads for single-thread workers.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use store::{schedule_unique, JobStore, JobTransaction, ParameterFilter, ScheduleOutcome, TimeWindow};
