//! Event Receiver: the service-facing front of the scheduler.
//!
//! Owns the workflow cache for one Start/Stop lifetime, wires the dispatch
//! handlers into the [`Scheduler`], and replays persisted events at startup.
//!
//! ```text
//! start ─▶ load workflows (blocking task)
//!       ─▶ [write lock] clear · register · install handlers · start · record
//!       ─▶ spawn recovery sweep
//! ```

use std::sync::Arc;
use std::time::Duration;

use reconflow_core::{
    Event, EventLogStore, Executor, LoadOutcome, ReconflowConfig, ScheduleStore, Trigger,
    TriggerKind, Workflow, WorkflowLoader,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::engine::Scheduler;
use crate::error::{ReceiverError, SchedulerError};
use crate::recovery::{self, RecoveryReport};

/// A trigger the receiver registered, with the workflow it belongs to.
#[derive(Debug, Clone)]
pub struct RegisteredEventTrigger {
    pub workflow: Arc<Workflow>,
    pub trigger: Trigger,
}

/// Flat view of a registered trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerInfo {
    pub workflow_name: String,
    pub trigger_name: String,
    pub kind: TriggerKind,
    pub topic: Option<String>,
    pub enabled: bool,
}

impl From<&RegisteredEventTrigger> for TriggerInfo {
    fn from(reg: &RegisteredEventTrigger) -> Self {
        Self {
            workflow_name: reg.workflow.name.clone(),
            trigger_name: reg.trigger.name.clone(),
            kind: reg.trigger.kind,
            topic: reg.trigger.topic().map(str::to_string),
            enabled: reg.trigger.enabled,
        }
    }
}

#[derive(Default)]
struct ReceiverState {
    running: bool,
    cancel: Option<CancellationToken>,
    workflows: Vec<Arc<Workflow>>,
    triggers: Vec<RegisteredEventTrigger>,
    recovery: Option<JoinHandle<RecoveryReport>>,
}

struct ReceiverInner {
    scheduler: Scheduler,
    loader: Arc<dyn WorkflowLoader>,
    executor: Arc<dyn Executor>,
    store: Option<Arc<dyn ScheduleStore>>,
    event_log: Option<Arc<dyn EventLogStore>>,
    config: Arc<ReconflowConfig>,
    state: RwLock<ReceiverState>,
}

/// Trigger-driven workflow runner. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventReceiver {
    inner: Arc<ReceiverInner>,
}

/// Builder for [`EventReceiver`]. Loader and executor are required.
#[derive(Default)]
pub struct EventReceiverBuilder {
    loader: Option<Arc<dyn WorkflowLoader>>,
    executor: Option<Arc<dyn Executor>>,
    store: Option<Arc<dyn ScheduleStore>>,
    event_log: Option<Arc<dyn EventLogStore>>,
    config: Option<Arc<ReconflowConfig>>,
}

impl EventReceiverBuilder {
    pub fn loader(mut self, loader: Arc<dyn WorkflowLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn schedule_store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_log(mut self, event_log: Arc<dyn EventLogStore>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn config(mut self, config: Arc<ReconflowConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<EventReceiver, ReceiverError> {
        let loader = self
            .loader
            .ok_or_else(|| ReceiverError::Config("workflow loader is required".into()))?;
        let executor = self
            .executor
            .ok_or_else(|| ReceiverError::Config("executor is required".into()))?;
        let config = self.config.unwrap_or_default();
        let scheduler = Scheduler::new(Duration::from_millis(config.scheduler.watch_debounce_ms));

        Ok(EventReceiver {
            inner: Arc::new(ReceiverInner {
                scheduler,
                loader,
                executor,
                store: self.store,
                event_log: self.event_log,
                config,
                state: RwLock::new(ReceiverState::default()),
            }),
        })
    }
}

impl EventReceiver {
    pub fn builder() -> EventReceiverBuilder {
        EventReceiverBuilder::default()
    }

    /// Load workflows, register their enabled triggers and start firing.
    /// No-op when already running.
    pub async fn start(&self, parent: &CancellationToken) -> Result<(), ReceiverError> {
        if self.is_running().await {
            return Ok(());
        }

        let workflows = self.load_workflows().await;

        let mut state = self.inner.state.write().await;
        if state.running {
            return Ok(());
        }

        let cancel = parent.child_token();
        let scheduler = &self.inner.scheduler;
        scheduler.clear();

        let mut registered = Vec::new();
        for workflow in &workflows {
            for trigger in workflow.enabled_triggers() {
                match scheduler.register_trigger(Arc::clone(workflow), trigger.clone()) {
                    Ok(()) => registered.push(RegisteredEventTrigger {
                        workflow: Arc::clone(workflow),
                        trigger: trigger.clone(),
                    }),
                    Err(e) => tracing::warn!("⚠️ Skipping trigger: {e}"),
                }
            }
        }

        self.install_handlers(cancel.clone());
        scheduler.start(&cancel);

        tracing::info!(
            "📡 Event receiver started: {} workflow(s), {} trigger(s)",
            workflows.len(),
            registered.len()
        );
        state.running = true;
        state.cancel = Some(cancel);
        state.workflows = workflows;
        state.triggers = registered;
        state.recovery = self.spawn_recovery();

        Ok(())
    }

    /// Stop firing triggers and cancel in-flight runs that honour cancellation.
    pub async fn stop(&self) {
        let mut state = self.inner.state.write().await;
        if !state.running {
            return;
        }
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        self.inner.scheduler.stop();
        state.running = false;
        tracing::info!("🛑 Event receiver stopped");
    }

    /// Fan the event out to every matching trigger. Returns the match count.
    pub async fn emit_event(&self, event: &Event) -> Result<usize, ReceiverError> {
        let state = self.inner.state.read().await;
        if !state.running {
            return Err(ReceiverError::NotRunning);
        }
        match self.inner.scheduler.emit_event(event) {
            Ok(matched) => Ok(matched),
            Err(SchedulerError::NotRunning) => Err(ReceiverError::NotRunning),
            Err(e) => Err(e.into()),
        }
    }

    /// Register one more trigger on the running receiver.
    pub async fn register_schedule(
        &self,
        workflow: Arc<Workflow>,
        trigger: Trigger,
    ) -> Result<(), ReceiverError> {
        let mut state = self.inner.state.write().await;
        if !state.running {
            return Err(ReceiverError::NotRunning);
        }

        self.inner
            .scheduler
            .register_trigger(Arc::clone(&workflow), trigger.clone())?;

        if !state.workflows.iter().any(|w| Arc::ptr_eq(w, &workflow)) {
            state.workflows.push(Arc::clone(&workflow));
        }
        tracing::info!("➕ Registered trigger {}/{}", workflow.name, trigger.name);
        state.triggers.push(RegisteredEventTrigger { workflow, trigger });
        Ok(())
    }

    pub async fn registered_workflows(&self) -> Vec<Arc<Workflow>> {
        self.inner.state.read().await.workflows.clone()
    }

    pub async fn registered_triggers(&self) -> Vec<RegisteredEventTrigger> {
        self.inner.state.read().await.triggers.clone()
    }

    pub async fn registered_triggers_info(&self) -> Vec<TriggerInfo> {
        self.inner
            .state
            .read()
            .await
            .triggers
            .iter()
            .map(TriggerInfo::from)
            .collect()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.read().await.running
    }

    pub fn workflow_loader(&self) -> Arc<dyn WorkflowLoader> {
        Arc::clone(&self.inner.loader)
    }

    /// Wait for the recovery sweep of the current Start, if one was spawned.
    pub async fn wait_recovery(&self) -> Option<RecoveryReport> {
        let handle = self.inner.state.write().await.recovery.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!("⚠️ Recovery task ended abnormally: {e}");
                None
            }
        }
    }

    async fn load_workflows(&self) -> Vec<Arc<Workflow>> {
        let loader = Arc::clone(&self.inner.loader);
        let outcome = match tokio::task::spawn_blocking(move || loader.load_all_workflows()).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!("❌ Failed to load workflows: {e}");
                LoadOutcome::default()
            }
            Err(e) => {
                tracing::error!("❌ Workflow loading task failed: {e}");
                LoadOutcome::default()
            }
        };

        for failure in &outcome.failures {
            tracing::warn!(
                "⚠️ Skipping workflow {}: {}",
                failure.path.display(),
                failure.reason
            );
        }

        outcome
            .workflows
            .into_iter()
            .filter(Workflow::has_enabled_triggers)
            .map(Arc::new)
            .collect()
    }

    fn install_handlers(&self, cancel: CancellationToken) {
        let dispatcher = Dispatcher::new(
            self.inner.store.clone(),
            Arc::clone(&self.inner.executor),
            Arc::clone(&self.inner.loader),
            Arc::clone(&self.inner.config),
            cancel,
        );
        let scheduler = &self.inner.scheduler;

        let d = dispatcher.clone();
        scheduler.set_event_handler(move |fired| d.handle_event(fired));
        let d = dispatcher.clone();
        scheduler.set_handler(TriggerKind::Cron, move |fired| d.handle_fired(fired));
        scheduler.set_handler(TriggerKind::Watch, move |fired| dispatcher.handle_fired(fired));
    }

    fn spawn_recovery(&self) -> Option<JoinHandle<RecoveryReport>> {
        let Some(log) = self.inner.event_log.clone() else {
            tracing::debug!("No event log configured, skipping recovery");
            return None;
        };
        let receiver = self.clone();
        let batch = self.inner.config.scheduler.recovery_batch;
        let delay = Duration::from_millis(self.inner.config.scheduler.recovery_delay_ms);

        Some(tokio::spawn(async move {
            recovery::recover_events(
                log.as_ref(),
                |event| {
                    let receiver = receiver.clone();
                    async move { receiver.emit_event(&event).await }
                },
                batch,
                delay,
            )
            .await
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EVENT_ENVELOPE_PARAM;
    use crate::test_support::{MockEventLog, MockLoader, MockStore, RecordingExecutor};
    use reconflow_core::Schedule;

    struct Harness {
        receiver: EventReceiver,
        loader: Arc<MockLoader>,
        executor: Arc<RecordingExecutor>,
    }

    fn harness(workflows: Vec<Workflow>, store: Option<MockStore>, log: Option<Arc<MockEventLog>>) -> Harness {
        let loader = Arc::new(MockLoader::with(workflows));
        let executor = Arc::new(RecordingExecutor::default());
        let mut config = ReconflowConfig::default();
        config.scheduler.recovery_delay_ms = 0;

        let mut builder = EventReceiver::builder()
            .loader(loader.clone())
            .executor(executor.clone())
            .config(Arc::new(config));
        if let Some(store) = store {
            builder = builder.schedule_store(Arc::new(store));
        }
        if let Some(log) = log {
            builder = builder.event_log(log);
        }
        Harness {
            receiver: builder.build().unwrap(),
            loader,
            executor,
        }
    }

    #[test]
    fn test_build_requires_loader_and_executor() {
        let err = EventReceiver::builder()
            .executor(Arc::new(RecordingExecutor::default()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ReceiverError::Config(_)));

        let err = EventReceiver::builder()
            .loader(Arc::new(MockLoader::default()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ReceiverError::Config(_)));
    }

    #[tokio::test]
    async fn test_emit_when_stopped() {
        let h = harness(vec![], None, None);
        let err = h.receiver.emit_event(&Event::new("t", "x")).await.unwrap_err();
        assert!(matches!(err, ReceiverError::NotRunning));
        assert_eq!(err.to_string(), "event receiver is not running");

        let err = h
            .receiver
            .register_schedule(Arc::new(Workflow::module("a")), Trigger::event("e", "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiverError::NotRunning));
    }

    #[tokio::test]
    async fn test_start_skips_invalid_triggers_and_untriggered_workflows() {
        let mut disabled = Trigger::event("off", "t");
        disabled.enabled = false;
        let workflows = vec![
            Workflow::module("good")
                .with_trigger(Trigger::event("ok", "recon.new-domain"))
                .with_trigger(Trigger::cron("bad-cron", "nope")),
            Workflow::module("no-topic").with_trigger(Trigger::event("missing", "")),
            Workflow::module("quiet").with_trigger(disabled),
            Workflow::module("manual"),
        ];
        let h = harness(workflows, None, None);
        h.loader.add_failure("broken.yaml");
        h.receiver.start(&CancellationToken::new()).await.unwrap();

        let info = h.receiver.registered_triggers_info().await;
        assert_eq!(
            info,
            vec![TriggerInfo {
                workflow_name: "good".into(),
                trigger_name: "ok".into(),
                kind: TriggerKind::Event,
                topic: Some("recon.new-domain".into()),
                enabled: true,
            }]
        );
        let names: Vec<String> = h
            .receiver
            .registered_workflows()
            .await
            .iter()
            .map(|w| w.name.clone())
            .collect();
        assert_eq!(names, vec!["good", "no-topic"]);
        assert!(h.receiver.is_running().await);
    }

    #[tokio::test]
    async fn test_scenario_legacy_event_input() {
        let workflow = Workflow::module("enum-subdomains")
            .with_trigger(Trigger::event("on-domain", "recon.new-domain").with_input_name("target"));
        let h = harness(vec![workflow], None, None);
        h.receiver.start(&CancellationToken::new()).await.unwrap();

        let matched = h
            .receiver
            .emit_event(&Event::new("recon.new-domain", "example.com"))
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let calls = h.executor.wait_for(1).await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].workflow, "enum-subdomains");
        let mut params = calls[0].params.clone();
        assert!(params.remove(EVENT_ENVELOPE_PARAM).is_some());
        assert_eq!(params, [("target".to_string(), "example.com".to_string())].into());
    }

    #[tokio::test]
    async fn test_scenario_cron_with_schedule() {
        let schedule = Schedule::new("nightly-scan", "every-second", "example.com").with_param("depth", "2");
        let workflow = Workflow::flow("nightly-scan").with_trigger(
            Trigger::cron("every-second", "* * * * * *").with_schedule_id(&schedule.id),
        );
        let h = harness(vec![workflow], Some(MockStore::with(vec![schedule])), None);
        h.receiver.start(&CancellationToken::new()).await.unwrap();

        let calls = h.executor.wait_for(1).await;
        h.receiver.stop().await;
        assert!(!calls.is_empty());
        assert!(calls[0].flow);
        assert_eq!(
            calls[0].params,
            [
                ("target".to_string(), "example.com".to_string()),
                ("depth".to_string(), "2".to_string()),
            ]
            .into()
        );
    }

    #[tokio::test]
    async fn test_scenario_disabled_schedule() {
        let mut schedule = Schedule::new("nightly-scan", "on-domain", "example.com").with_param("depth", "2");
        schedule.is_enabled = false;
        let workflow = Workflow::module("nightly-scan")
            .with_trigger(Trigger::event("on-domain", "recon.new-domain").with_schedule_id(&schedule.id));
        let h = harness(vec![workflow], Some(MockStore::with(vec![schedule])), None);
        h.receiver.start(&CancellationToken::new()).await.unwrap();

        for data in ["example.com", "", r#"{"domain": "x.example.com"}"#] {
            let matched = h
                .receiver
                .emit_event(&Event::new("recon.new-domain", data))
                .await
                .unwrap();
            assert_eq!(matched, 1);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_to_every_matching_trigger() {
        let workflows = (0..3)
            .map(|i| Workflow::module(&format!("wf-{i}")).with_trigger(Trigger::event("on", "assets")))
            .collect();
        let h = harness(workflows, None, None);
        h.receiver.start(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.receiver.emit_event(&Event::new("assets", "a")).await.unwrap(), 3);
        assert_eq!(h.receiver.emit_event(&Event::new("nothing", "a")).await.unwrap(), 0);
        let mut ran: Vec<String> = h.executor.wait_for(3).await.into_iter().map(|c| c.workflow).collect();
        ran.sort();
        assert_eq!(ran, vec!["wf-0", "wf-1", "wf-2"]);
    }

    #[tokio::test]
    async fn test_stop_start_reloads_workflows() {
        let h = harness(
            vec![Workflow::module("v1").with_trigger(Trigger::event("on", "t"))],
            None,
            None,
        );
        let token = CancellationToken::new();
        h.receiver.start(&token).await.unwrap();
        h.receiver.stop().await;
        h.receiver.stop().await;
        assert!(!h.receiver.is_running().await);
        assert!(!token.is_cancelled());

        h.loader.set(vec![
            Workflow::module("v2").with_trigger(Trigger::event("on", "t")),
            Workflow::module("v3").with_trigger(Trigger::event("on", "t")),
        ]);
        h.receiver.start(&token).await.unwrap();
        assert!(h.receiver.is_running().await);

        let triggers = h.receiver.registered_triggers().await;
        let names: Vec<&str> = triggers.iter().map(|t| t.workflow.name.as_str()).collect();
        assert_eq!(names, vec!["v2", "v3"]);
        assert_eq!(h.receiver.emit_event(&Event::new("t", "x")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_register_schedule_tracks_trigger() {
        let h = harness(vec![], None, None);
        h.receiver.start(&CancellationToken::new()).await.unwrap();

        let workflow = Arc::new(Workflow::module("late"));
        h.receiver
            .register_schedule(Arc::clone(&workflow), Trigger::event("late-on", "late.topic"))
            .await
            .unwrap();
        let err = h
            .receiver
            .register_schedule(workflow, Trigger::event("bad", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiverError::Scheduler(SchedulerError::Validation { .. })));

        assert_eq!(h.receiver.registered_triggers().await.len(), 1);
        assert_eq!(h.receiver.emit_event(&Event::new("late.topic", "x")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recovery_replays_persisted_events() {
        let log = Arc::new(MockEventLog::default());
        log.push("recon.new-domain", "a.example.com");
        log.push("recon.new-domain", "b.example.com");
        let workflow = Workflow::module("enum")
            .with_trigger(Trigger::event("on-domain", "recon.new-domain"));
        let h = harness(vec![workflow], None, Some(log.clone()));

        h.receiver.start(&CancellationToken::new()).await.unwrap();
        let report = h.receiver.wait_recovery().await.unwrap();
        assert_eq!(report, RecoveryReport { fetched: 2, emitted: 2, failed: 0 });

        let calls = h.executor.wait_for(2).await;
        let mut targets: Vec<String> = calls.iter().map(|c| c.params["target"].clone()).collect();
        targets.sort();
        assert_eq!(targets, vec!["a.example.com", "b.example.com"]);
        assert_eq!(log.marks(), vec![(1, None), (2, None)]);
    }

    #[tokio::test]
    async fn test_stop_cancels_run_context() {
        let h = harness(vec![], None, None);
        let token = CancellationToken::new();
        h.receiver.start(&token).await.unwrap();
        let cancel = h.receiver.inner.state.read().await.cancel.clone().unwrap();
        h.receiver.stop().await;
        assert!(cancel.is_cancelled());
        assert!(!token.is_cancelled());
    }
}
