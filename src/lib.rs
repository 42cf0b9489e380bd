//! Scheduled backups of Amazon MQ broker configuration and RabbitMQ queue
//! listings to S3.

pub mod aws;
pub mod backup;
pub mod credentials;
pub mod fetch;
pub mod model;
pub mod retry;
pub mod schedule;
pub mod staging;
pub mod storage;

pub use backup::{BackupRunner, InstanceOutcome, InstanceReport, RunSummary};
pub use model::config::{BackupConfig, BackupSettings, ConfigError, InstanceSpec, Schedule};
