// Background Jobs Service
//
// Scheduled background work for the automation engine.
// Jobs are scheduled using tokio-cron-scheduler and run at fixed intervals.

pub mod retry;
pub mod scheduler;

pub use scheduler::{JobConfig, JobScheduler};
