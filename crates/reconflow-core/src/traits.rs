//! Collaborator seams: workflow loading, persisted stores, and execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ReconflowConfig;
use crate::error::{Result, StoreError};
use crate::schedule::{EventLogRow, Schedule};
use crate::workflow::Workflow;

/// Parameters handed to a run.
pub type Params = BTreeMap<String, String>;

/// Result of a best-effort load: everything that parsed, plus what didn't.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub workflows: Vec<Workflow>,
    pub failures: Vec<LoadFailure>,
}

#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Loads workflow definitions.
pub trait WorkflowLoader: Send + Sync {
    /// Load every workflow. One bad definition never fails the others.
    fn load_all_workflows(&self) -> Result<LoadOutcome>;

    /// Load a single workflow by name.
    fn load_workflow(&self, name: &str) -> Result<Workflow>;
}

/// Read side of the persisted schedules.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get_schedule_by_id(&self, id: &str) -> std::result::Result<Schedule, StoreError>;
}

/// Read/mark side of the persisted event log.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Unprocessed rows in creation order.
    async fn list_unprocessed(&self, limit: usize) -> std::result::Result<Vec<EventLogRow>, StoreError>;

    /// Mark a row processed, recording the failure text if any.
    async fn mark_processed(&self, id: i64, error: Option<&str>) -> std::result::Result<(), StoreError>;
}

/// Everything a run needs besides the workflow and its parameters.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Cancelled when the receiver stops. Runs that ignore it finish anyway.
    pub cancel: CancellationToken,
    pub loader: Arc<dyn WorkflowLoader>,
    pub config: Arc<ReconflowConfig>,
    pub server_mode: bool,
    pub scheduler_invoked: bool,
}

impl ExecutionContext {
    /// Context for a run started by a trigger fire.
    pub fn for_scheduler(
        cancel: CancellationToken,
        loader: Arc<dyn WorkflowLoader>,
        config: Arc<ReconflowConfig>,
    ) -> Self {
        Self {
            cancel,
            loader,
            config,
            server_mode: true,
            scheduler_invoked: true,
        }
    }

    /// Context for a run started by hand (CLI).
    pub fn manual(
        cancel: CancellationToken,
        loader: Arc<dyn WorkflowLoader>,
        config: Arc<ReconflowConfig>,
    ) -> Self {
        Self {
            cancel,
            loader,
            config,
            server_mode: false,
            scheduler_invoked: false,
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("server_mode", &self.server_mode)
            .field("scheduler_invoked", &self.scheduler_invoked)
            .finish()
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl RunResult {
    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

/// Runs workflows.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute_flow(
        &self,
        ctx: &ExecutionContext,
        workflow: &Workflow,
        params: &Params,
    ) -> Result<RunResult>;

    async fn execute_module(
        &self,
        ctx: &ExecutionContext,
        workflow: &Workflow,
        params: &Params,
    ) -> Result<RunResult>;
}
