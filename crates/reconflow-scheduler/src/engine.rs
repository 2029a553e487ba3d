//! Scheduler Engine: owns trigger registrations and fires them.
//!
//! - Event triggers are indexed by topic and fired from [`Scheduler::emit_event`].
//! - Cron triggers get one timer task each while the scheduler runs.
//! - Watch triggers get one filesystem watch task each while the scheduler runs.
//!
//! Handlers are called on the fire path and must hand real work off to a
//! spawned task themselves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use reconflow_core::{Event, Trigger, TriggerKind, Workflow};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cron::{self, CronSchedule};
use crate::error::SchedulerError;
use crate::vars::{self, ResolvedVars};
use crate::watch;

/// A cron or watch trigger that fired.
#[derive(Debug, Clone)]
pub struct FiredTrigger {
    pub workflow: Arc<Workflow>,
    pub trigger: Trigger,
    /// Empty for cron fires, the changed path for watch fires.
    pub input: String,
}

/// An event trigger that matched an emitted event.
#[derive(Debug, Clone)]
pub struct FiredEvent {
    pub workflow: Arc<Workflow>,
    pub trigger: Trigger,
    pub event: Event,
    /// Legacy scalar input extracted from the event.
    pub input: String,
    /// Present when the trigger declares vars and at least one resolved.
    pub vars: Option<ResolvedVars>,
}

pub type TriggerHandler = Arc<dyn Fn(FiredTrigger) -> Result<(), SchedulerError> + Send + Sync>;
pub type EventHandler = Arc<dyn Fn(FiredEvent) -> Result<(), SchedulerError> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    workflow: Arc<Workflow>,
    trigger: Trigger,
}

struct CronRegistration {
    registration: Registration,
    schedule: CronSchedule,
}

struct WatchRegistration {
    registration: Registration,
    path: PathBuf,
}

#[derive(Default)]
struct Registry {
    by_topic: HashMap<String, Vec<Registration>>,
    crons: Vec<Arc<CronRegistration>>,
    watches: Vec<Arc<WatchRegistration>>,
}

#[derive(Default)]
struct Handlers {
    cron: Option<TriggerHandler>,
    watch: Option<TriggerHandler>,
    event: Option<EventHandler>,
}

struct RunState {
    running: bool,
    parent: CancellationToken,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    // Lock order: state, then registry.
    state: Mutex<RunState>,
    registry: RwLock<Registry>,
    handlers: RwLock<Handlers>,
    watch_debounce: Duration,
}

/// Trigger scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a stopped scheduler.
    pub fn new(watch_debounce: Duration) -> Self {
        let parent = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RunState {
                    running: false,
                    cancel: parent.child_token(),
                    parent,
                    tasks: Vec::new(),
                }),
                registry: RwLock::new(Registry::default()),
                handlers: RwLock::new(Handlers::default()),
                watch_debounce,
            }),
        }
    }

    /// Validate and install a trigger. Cron/watch triggers registered while
    /// running start immediately, otherwise on the next [`start`](Self::start).
    pub fn register_trigger(
        &self,
        workflow: Arc<Workflow>,
        trigger: Trigger,
    ) -> Result<(), SchedulerError> {
        if let Some(field) = trigger.missing_field() {
            return Err(SchedulerError::Validation {
                workflow: workflow.name.clone(),
                trigger: trigger.name.clone(),
                field,
            });
        }

        let mut state = self.inner.lock_state();
        let registration = Registration { workflow, trigger };

        match registration.trigger.kind {
            TriggerKind::Event => {
                let topic = registration.trigger.topic().unwrap_or_default().to_string();
                tracing::info!(
                    "📌 Event trigger registered: {}/{} on '{}'",
                    registration.workflow.name,
                    registration.trigger.name,
                    topic
                );
                self.inner
                    .write_registry()
                    .by_topic
                    .entry(topic)
                    .or_default()
                    .push(registration);
            }
            TriggerKind::Cron => {
                let expression = registration.trigger.cron_expression().unwrap_or_default();
                let schedule = cron::parse_cron(expression).map_err(|reason| {
                    SchedulerError::InvalidCron {
                        trigger: registration.trigger.name.clone(),
                        expression: expression.to_string(),
                        reason,
                    }
                })?;
                tracing::info!(
                    "📅 Cron trigger registered: {}/{} ({})",
                    registration.workflow.name,
                    registration.trigger.name,
                    expression
                );
                let cron_reg = Arc::new(CronRegistration {
                    registration,
                    schedule,
                });
                self.inner.write_registry().crons.push(Arc::clone(&cron_reg));
                if state.running {
                    let handle = spawn_cron(Arc::clone(&self.inner), cron_reg, state.cancel.clone());
                    state.tasks.push(handle);
                }
            }
            TriggerKind::Watch => {
                let raw = registration.trigger.path.as_deref().unwrap_or(Path::new(""));
                let path = watch::expand_path(raw);
                watch::check_watchable(&path).map_err(|reason| SchedulerError::Watch {
                    trigger: registration.trigger.name.clone(),
                    reason,
                })?;
                tracing::info!(
                    "👀 Watch trigger registered: {}/{} ({})",
                    registration.workflow.name,
                    registration.trigger.name,
                    path.display()
                );
                let watch_reg = Arc::new(WatchRegistration { registration, path });
                self.inner.write_registry().watches.push(Arc::clone(&watch_reg));
                if state.running {
                    let cancel = state.cancel.clone();
                    state
                        .tasks
                        .extend(spawn_path_watch(Arc::clone(&self.inner), watch_reg, cancel));
                }
            }
        }

        Ok(())
    }

    /// Install the handler for cron or watch fires. An event-kind handler set
    /// here only sees the extracted input, not the envelope or vars.
    pub fn set_handler<F>(&self, kind: TriggerKind, f: F)
    where
        F: Fn(FiredTrigger) -> Result<(), SchedulerError> + Send + Sync + 'static,
    {
        let handler: TriggerHandler = Arc::new(f);
        let mut handlers = self.inner.write_handlers();
        match kind {
            TriggerKind::Cron => handlers.cron = Some(handler),
            TriggerKind::Watch => handlers.watch = Some(handler),
            TriggerKind::Event => {
                handlers.event = Some(Arc::new(move |fired: FiredEvent| {
                    handler(FiredTrigger {
                        workflow: fired.workflow,
                        trigger: fired.trigger,
                        input: fired.input,
                    })
                }));
            }
        }
    }

    /// Install the event handler, which also receives the envelope and resolved vars.
    pub fn set_event_handler<F>(&self, f: F)
    where
        F: Fn(FiredEvent) -> Result<(), SchedulerError> + Send + Sync + 'static,
    {
        self.inner.write_handlers().event = Some(Arc::new(f));
    }

    /// Start cron timers and filesystem watches. No-op when already running.
    pub fn start(&self, parent: &CancellationToken) {
        let mut state = self.inner.lock_state();
        if state.running {
            return;
        }

        state.parent = parent.clone();
        state.cancel = parent.child_token();

        let (crons, watches) = {
            let registry = self.inner.read_registry();
            (registry.crons.clone(), registry.watches.clone())
        };
        for cron_reg in crons {
            let handle = spawn_cron(Arc::clone(&self.inner), cron_reg, state.cancel.clone());
            state.tasks.push(handle);
        }
        for watch_reg in watches {
            if let Some(handle) =
                spawn_path_watch(Arc::clone(&self.inner), watch_reg, state.cancel.clone())
            {
                state.tasks.push(handle);
            }
        }

        state.running = true;
        tracing::info!("⏰ Scheduler started ({} timer/watch tasks)", state.tasks.len());
    }

    /// Stop timers and watches. Runs already handed off are left alone.
    pub fn stop(&self) {
        let mut state = self.inner.lock_state();
        if !state.running {
            return;
        }
        state.cancel.cancel();
        state.tasks.clear();
        state.running = false;
        tracing::info!("⏹️ Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }

    /// Drop every registration, stopping their timers and watches.
    pub fn clear(&self) {
        let mut state = self.inner.lock_state();
        if state.running {
            state.cancel.cancel();
            state.tasks.clear();
            state.cancel = state.parent.child_token();
        }
        *self.inner.write_registry() = Registry::default();
    }

    /// Fire every enabled event trigger subscribed to the event's topic.
    /// Returns how many triggers matched. Handler failures are logged per
    /// trigger and never fail the call.
    pub fn emit_event(&self, event: &Event) -> Result<usize, SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        let matches: Vec<Registration> = self
            .inner
            .read_registry()
            .by_topic
            .get(&event.topic)
            .map(|regs| regs.iter().filter(|r| r.trigger.enabled).cloned().collect())
            .unwrap_or_default();

        if matches.is_empty() {
            tracing::debug!("No triggers for topic '{}'", event.topic);
            return Ok(0);
        }

        let Some(handler) = self.inner.read_handlers().event.clone() else {
            tracing::warn!(
                "⚠️ {} trigger(s) match '{}' but no event handler is installed",
                matches.len(),
                event.topic
            );
            return Ok(matches.len());
        };

        let matched = matches.len();
        for Registration { workflow, trigger } in matches {
            let fired = FiredEvent {
                input: vars::extract_input(&trigger, event),
                vars: vars::resolve_vars(&trigger, event),
                event: event.clone(),
                workflow,
                trigger,
            };
            let label = format!("{}/{}", fired.workflow.name, fired.trigger.name);
            if let Err(e) = handler(fired) {
                tracing::warn!("⚠️ Event trigger {label} failed: {e}");
            }
        }

        Ok(matched)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_handlers(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_handlers(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand a cron/watch fire to its handler.
    fn fire(&self, registration: &Registration, input: String) {
        if !registration.trigger.enabled {
            return;
        }
        let handler = {
            let handlers = self.read_handlers();
            match registration.trigger.kind {
                TriggerKind::Cron => handlers.cron.clone(),
                TriggerKind::Watch => handlers.watch.clone(),
                TriggerKind::Event => None,
            }
        };
        let label = format!("{}/{}", registration.workflow.name, registration.trigger.name);
        let Some(handler) = handler else {
            tracing::warn!("⚠️ {} trigger {label} fired with no handler installed", registration.trigger.kind);
            return;
        };

        tracing::info!("🔔 Trigger fired: {label}");
        let fired = FiredTrigger {
            workflow: Arc::clone(&registration.workflow),
            trigger: registration.trigger.clone(),
            input,
        };
        if let Err(e) = handler(fired) {
            tracing::warn!("⚠️ Trigger {label} failed: {e}");
        }
    }
}

fn spawn_cron(
    inner: Arc<Inner>,
    cron_reg: Arc<CronRegistration>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = cron::next_run_from_cron(&cron_reg.schedule, now) else {
                tracing::info!(
                    "Cron trigger '{}' has no upcoming runs",
                    cron_reg.registration.trigger.name
                );
                return;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::from_millis(100));

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {
                    inner.fire(&cron_reg.registration, String::new());
                }
            }
        }
    })
}

fn spawn_path_watch(
    inner: Arc<Inner>,
    watch_reg: Arc<WatchRegistration>,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let debounce = inner.watch_debounce;
    let path = watch_reg.path.clone();
    let registration = watch_reg.registration.clone();
    let result = watch::spawn_watch(&path, debounce, cancel, move |changed| {
        inner.fire(&registration, changed.display().to_string());
    });

    match result {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(
                "❌ Failed to watch {} for trigger '{}': {e}",
                path.display(),
                watch_reg.registration.trigger.name
            );
            None
        }
    }
}
