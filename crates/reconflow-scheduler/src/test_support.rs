//! Hand-written collaborator mocks shared by the scheduler tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reconflow_core::{
    CoreError, EventLogRow, EventLogStore, ExecutionContext, Executor, LoadFailure, LoadOutcome,
    Params, Result, RunResult, RunStatus, Schedule, ScheduleStore, StoreError, Workflow,
    WorkflowLoader,
};

#[derive(Default)]
pub struct MockLoader {
    workflows: Mutex<Vec<Workflow>>,
    failures: Mutex<Vec<String>>,
}

impl MockLoader {
    pub fn with(workflows: Vec<Workflow>) -> Self {
        let loader = Self::default();
        loader.set(workflows);
        loader
    }

    pub fn set(&self, workflows: Vec<Workflow>) {
        *self.workflows.lock().unwrap() = workflows;
    }

    pub fn add_failure(&self, path: &str) {
        self.failures.lock().unwrap().push(path.to_string());
    }
}

impl WorkflowLoader for MockLoader {
    fn load_all_workflows(&self) -> Result<LoadOutcome> {
        Ok(LoadOutcome {
            workflows: self.workflows.lock().unwrap().clone(),
            failures: self
                .failures
                .lock()
                .unwrap()
                .iter()
                .map(|p| LoadFailure {
                    path: p.into(),
                    reason: "broken yaml".into(),
                })
                .collect(),
        })
    }

    fn load_workflow(&self, name: &str) -> Result<Workflow> {
        self.workflows
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.name == name)
            .cloned()
            .ok_or_else(|| CoreError::WorkflowNotFound(name.to_string()))
    }
}

#[derive(Default)]
pub struct MockStore {
    schedules: Mutex<HashMap<String, Schedule>>,
}

impl MockStore {
    pub fn with(schedules: Vec<Schedule>) -> Self {
        let store = Self::default();
        for s in schedules {
            store.schedules.lock().unwrap().insert(s.id.clone(), s);
        }
        store
    }
}

#[async_trait]
impl ScheduleStore for MockStore {
    async fn get_schedule_by_id(&self, id: &str) -> std::result::Result<Schedule, StoreError> {
        self.schedules
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[derive(Default)]
pub struct MockEventLog {
    pub rows: Mutex<Vec<EventLogRow>>,
    pub marks: Mutex<Vec<(i64, Option<String>)>>,
}

impl MockEventLog {
    pub fn push(&self, topic: &str, data: &str) {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i64 + 1;
        rows.push(EventLogRow {
            id,
            topic: topic.to_string(),
            event_id: format!("evt-{id}"),
            name: String::new(),
            source: "test".into(),
            data_type: "text".into(),
            data: data.to_string(),
            processed: false,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
        });
    }

    pub fn marks(&self) -> Vec<(i64, Option<String>)> {
        self.marks.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventLogStore for MockEventLog {
    async fn list_unprocessed(&self, limit: usize) -> std::result::Result<Vec<EventLogRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.processed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: i64, error: Option<&str>) -> std::result::Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.processed = true;
        row.error = error.map(str::to_string);
        self.marks.lock().unwrap().push((id, row.error.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub workflow: String,
    pub flow: bool,
    pub params: Params,
    pub server_mode: bool,
    pub scheduler_invoked: bool,
}

#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<Invocation>>,
    pub fail: bool,
}

impl RecordingExecutor {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Poll until at least `n` invocations were recorded or the timeout passes.
    pub async fn wait_for(&self, n: usize) -> Vec<Invocation> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.calls.lock().unwrap().len() < n && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.calls()
    }

    fn record(&self, ctx: &ExecutionContext, workflow: &Workflow, params: &Params, flow: bool) -> Result<RunResult> {
        self.calls.lock().unwrap().push(Invocation {
            workflow: workflow.name.clone(),
            flow,
            params: params.clone(),
            server_mode: ctx.server_mode,
            scheduler_invoked: ctx.scheduler_invoked,
        });
        if self.fail {
            return Err(CoreError::Execution("mock failure".into()));
        }
        let now = Utc::now();
        Ok(RunResult {
            status: RunStatus::Completed,
            start_time: now,
            end_time: now,
        })
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute_flow(&self, ctx: &ExecutionContext, workflow: &Workflow, params: &Params) -> Result<RunResult> {
        self.record(ctx, workflow, params, true)
    }

    async fn execute_module(&self, ctx: &ExecutionContext, workflow: &Workflow, params: &Params) -> Result<RunResult> {
        self.record(ctx, workflow, params, false)
    }
}
