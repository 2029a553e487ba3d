//! Workflow and trigger definitions: the data model the scheduler works on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A named, loadable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow name.
    pub name: String,
    /// Flow (runs member modules) or Module (runs its own steps).
    #[serde(default)]
    pub kind: WorkflowKind,
    #[serde(default)]
    pub description: String,
    /// Default parameters, lowest precedence.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Commands run by a Module.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Module names run in order by a Flow.
    #[serde(default)]
    pub modules: Vec<String>,
    /// File the workflow was loaded from, if any.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    Flow,
    #[default]
    Module,
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowKind::Flow => write!(f, "flow"),
            WorkflowKind::Module => write!(f, "module"),
        }
    }
}

/// One command of a Module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Shell command; `{{key}}` placeholders are filled from run parameters.
    pub command: String,
}

/// When/how a trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Fires on a cron schedule.
    Cron,
    /// Fires when an emitted event's topic matches.
    Event,
    /// Fires when something changes under a filesystem path.
    Watch,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Cron => write!(f, "cron"),
            TriggerKind::Event => write!(f, "event"),
            TriggerKind::Watch => write!(f, "watch"),
        }
    }
}

/// A condition bound to a workflow that starts a run when satisfied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    #[serde(rename = "on")]
    pub kind: TriggerKind,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Cron expression (cron triggers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Topic filter (event triggers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventFilter>,
    /// Watched path (watch triggers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Legacy input mapping: which parameter receives the fired input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<TriggerInput>,
    /// Persisted schedule backing this trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    /// Parameter name → expression evaluated against the event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
}

fn bool_true() -> bool { true }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub topic: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerInput {
    /// Parameter name the input is written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Payload path the input is read from (event triggers). Defaults to the raw data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Trigger {
    /// Create a cron trigger.
    pub fn cron(name: &str, expression: &str) -> Self {
        let mut trigger = Self::empty(name, TriggerKind::Cron);
        trigger.schedule = Some(expression.to_string());
        trigger
    }

    /// Create an event trigger for a topic.
    pub fn event(name: &str, topic: &str) -> Self {
        let mut trigger = Self::empty(name, TriggerKind::Event);
        trigger.event = Some(EventFilter {
            topic: topic.to_string(),
        });
        trigger
    }

    /// Create a filesystem watch trigger.
    pub fn watch(name: &str, path: impl Into<PathBuf>) -> Self {
        let mut trigger = Self::empty(name, TriggerKind::Watch);
        trigger.path = Some(path.into());
        trigger
    }

    fn empty(name: &str, kind: TriggerKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            enabled: true,
            schedule: None,
            event: None,
            path: None,
            input: None,
            schedule_id: None,
            vars: BTreeMap::new(),
        }
    }

    /// Set the legacy input parameter name.
    pub fn with_input_name(mut self, name: &str) -> Self {
        self.input.get_or_insert_with(TriggerInput::default).name = Some(name.to_string());
        self
    }

    /// Bind the trigger to a persisted schedule.
    pub fn with_schedule_id(mut self, id: &str) -> Self {
        self.schedule_id = Some(id.to_string());
        self
    }

    /// Add a resolved-variable expression.
    pub fn with_var(mut self, name: &str, expression: &str) -> Self {
        self.vars.insert(name.to_string(), expression.to_string());
        self
    }

    /// Topic of an event trigger, if set.
    pub fn topic(&self) -> Option<&str> {
        self.event
            .as_ref()
            .map(|e| e.topic.trim())
            .filter(|t| !t.is_empty())
    }

    /// Cron expression of a cron trigger, if set.
    pub fn cron_expression(&self) -> Option<&str> {
        self.schedule.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Declared legacy input parameter name.
    pub fn input_name(&self) -> Option<&str> {
        self.input
            .as_ref()
            .and_then(|i| i.name.as_deref())
            .filter(|n| !n.is_empty())
    }

    /// Name of the field this trigger's kind requires, when it is absent.
    pub fn missing_field(&self) -> Option<&'static str> {
        match self.kind {
            TriggerKind::Cron if self.cron_expression().is_none() => Some("schedule"),
            TriggerKind::Event if self.topic().is_none() => Some("event.topic"),
            TriggerKind::Watch if self.path.as_ref().is_none_or(|p| p.as_os_str().is_empty()) => {
                Some("path")
            }
            _ => None,
        }
    }
}

impl Workflow {
    /// Create an empty module workflow.
    pub fn module(name: &str) -> Self {
        Self::new(name, WorkflowKind::Module)
    }

    /// Create an empty flow workflow.
    pub fn flow(name: &str) -> Self {
        Self::new(name, WorkflowKind::Flow)
    }

    fn new(name: &str, kind: WorkflowKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: String::new(),
            params: BTreeMap::new(),
            triggers: Vec::new(),
            steps: Vec::new(),
            modules: Vec::new(),
            source_path: None,
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_step(mut self, name: &str, command: &str) -> Self {
        self.steps.push(Step {
            name: name.to_string(),
            command: command.to_string(),
        });
        self
    }

    /// Triggers that should be registered.
    pub fn enabled_triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter().filter(|t| t.enabled)
    }

    pub fn has_enabled_triggers(&self) -> bool {
        self.enabled_triggers().next().is_some()
    }
}
