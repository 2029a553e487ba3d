//! Scheduler and receiver errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("trigger '{trigger}' of workflow '{workflow}' is missing required field '{field}'")]
    Validation {
        workflow: String,
        trigger: String,
        field: &'static str,
    },

    #[error("trigger '{trigger}' has an invalid cron expression '{expression}': {reason}")]
    InvalidCron {
        trigger: String,
        expression: String,
        reason: String,
    },

    #[error("trigger '{trigger}' cannot watch its path: {reason}")]
    Watch { trigger: String, reason: String },

    #[error("scheduler is not running")]
    NotRunning,

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("event receiver misconfigured: {0}")]
    Config(String),

    #[error("event receiver is not running")]
    NotRunning,

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
