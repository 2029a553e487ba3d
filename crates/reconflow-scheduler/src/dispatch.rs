//! Trigger handlers: turn a fire into a workflow run on its own task.
//!
//! The handler itself only spawns; schedule lookup, parameter resolution and
//! execution happen on the spawned task and report through `tracing` only.

use std::sync::Arc;

use reconflow_core::{
    ExecutionContext, Executor, ReconflowConfig, RunResult, Schedule, ScheduleStore, Trigger,
    Workflow, WorkflowKind, WorkflowLoader,
};
use tokio_util::sync::CancellationToken;

use crate::engine::{FiredEvent, FiredTrigger};
use crate::error::SchedulerError;
use crate::params::{self, ParamStrategy};

/// Everything a fired trigger needs to become a run.
#[derive(Clone)]
pub struct Dispatcher {
    store: Option<Arc<dyn ScheduleStore>>,
    executor: Arc<dyn Executor>,
    loader: Arc<dyn WorkflowLoader>,
    config: Arc<ReconflowConfig>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        store: Option<Arc<dyn ScheduleStore>>,
        executor: Arc<dyn Executor>,
        loader: Arc<dyn WorkflowLoader>,
        config: Arc<ReconflowConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            executor,
            loader,
            config,
            cancel,
        }
    }

    /// Event handler: resolve vars or legacy input, attach the envelope.
    pub fn handle_event(&self, fired: FiredEvent) -> Result<(), SchedulerError> {
        let FiredEvent {
            workflow,
            trigger,
            event,
            input,
            vars,
        } = fired;
        tracing::info!(
            "📨 Event '{}' ({}) → {}/{}",
            event.topic,
            event.id,
            workflow.name,
            trigger.name
        );
        let strategy = ParamStrategy::for_event(input, vars);
        self.spawn_run(workflow, trigger, strategy, Some(event.envelope_json()))
    }

    /// Cron/watch handler.
    pub fn handle_fired(&self, fired: FiredTrigger) -> Result<(), SchedulerError> {
        let FiredTrigger {
            workflow,
            trigger,
            input,
        } = fired;
        self.spawn_run(workflow, trigger, ParamStrategy::FiredInput(input), None)
    }

    fn spawn_run(
        &self,
        workflow: Arc<Workflow>,
        trigger: Trigger,
        strategy: ParamStrategy,
        envelope: Option<String>,
    ) -> Result<(), SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Dispatch(e.to_string()))?;
        let dispatcher = self.clone();
        runtime.spawn(async move {
            dispatcher.run(&workflow, &trigger, strategy, envelope).await;
        });
        Ok(())
    }

    /// Resolve params and execute. `None` when skipped or failed.
    pub(crate) async fn run(
        &self,
        workflow: &Workflow,
        trigger: &Trigger,
        strategy: ParamStrategy,
        envelope: Option<String>,
    ) -> Option<RunResult> {
        let schedule = self.lookup_schedule(trigger).await;
        if let Some(schedule) = schedule.as_ref().filter(|s| !s.is_enabled) {
            tracing::info!(
                "⏸️ Schedule {} is disabled, skipping {}/{}",
                schedule.id,
                workflow.name,
                trigger.name
            );
            return None;
        }

        let params = params::resolve_params(trigger, schedule.as_ref(), strategy, envelope);
        let ctx = ExecutionContext::for_scheduler(
            self.cancel.clone(),
            Arc::clone(&self.loader),
            Arc::clone(&self.config),
        );

        tracing::info!(
            "🚀 Running {} '{}' (trigger '{}', {} params)",
            workflow.kind,
            workflow.name,
            trigger.name,
            params.len()
        );
        let result = match workflow.kind {
            WorkflowKind::Flow => self.executor.execute_flow(&ctx, workflow, &params).await,
            WorkflowKind::Module => self.executor.execute_module(&ctx, workflow, &params).await,
        };

        match result {
            Ok(run) => {
                tracing::info!(
                    "✅ {} finished: {} in {}ms",
                    workflow.name,
                    run.status,
                    run.duration().num_milliseconds()
                );
                Some(run)
            }
            Err(e) => {
                tracing::error!("❌ {} (trigger '{}') failed: {e}", workflow.name, trigger.name);
                None
            }
        }
    }

    async fn lookup_schedule(&self, trigger: &Trigger) -> Option<Schedule> {
        let id = trigger.schedule_id.as_deref().filter(|id| !id.is_empty())?;
        let store = self.store.as_ref()?;
        match store.get_schedule_by_id(id).await {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                tracing::warn!("⚠️ Schedule {id} for trigger '{}' unavailable: {e}", trigger.name);
                None
            }
        }
    }
}
