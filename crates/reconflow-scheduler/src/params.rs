//! Parameter resolution for scheduled runs.
//!
//! Base params come from the bound schedule (target + string params). The
//! trigger's own contribution is layered on top by one [`ParamStrategy`].

use reconflow_core::{Params, Schedule, Trigger};

use crate::vars::ResolvedVars;

/// Reserved key carrying the serialized event envelope into event runs.
pub const EVENT_ENVELOPE_PARAM: &str = "event_envelope";

/// Key the schedule target and legacy unnamed input land in.
pub const TARGET_PARAM: &str = "target";

/// How a fired trigger's input is layered over the schedule params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamStrategy {
    /// Event trigger with vars: every resolved var overrides.
    ResolvedVars(ResolvedVars),
    /// Event trigger without resolved vars: scalar input under `input.name`,
    /// else under `target` when non-empty.
    LegacyEventInput(String),
    /// Cron/watch fire: input under `input.name` when both are non-empty.
    FiredInput(String),
}

impl ParamStrategy {
    /// Pick the strategy for an event fire.
    pub fn for_event(input: String, vars: Option<ResolvedVars>) -> Self {
        match vars {
            Some(vars) => ParamStrategy::ResolvedVars(vars),
            None => ParamStrategy::LegacyEventInput(input),
        }
    }

    fn apply(self, trigger: &Trigger, params: &mut Params) {
        match self {
            ParamStrategy::ResolvedVars(vars) => params.extend(vars),
            ParamStrategy::LegacyEventInput(input) => match trigger.input_name() {
                Some(name) => {
                    params.insert(name.to_string(), input);
                }
                None if !input.is_empty() => {
                    params.insert(TARGET_PARAM.to_string(), input);
                }
                None => {}
            },
            ParamStrategy::FiredInput(input) => {
                if let Some(name) = trigger.input_name().filter(|_| !input.is_empty()) {
                    params.insert(name.to_string(), input);
                }
            }
        }
    }
}

/// Params seeded from a schedule. Non-string params never make it through.
pub fn schedule_params(schedule: &Schedule) -> Params {
    let mut params = Params::new();
    if !schedule.target.is_empty() {
        params.insert(TARGET_PARAM.to_string(), schedule.target.clone());
    }
    params.extend(schedule.string_params());
    params
}

/// Full resolution: schedule seed, strategy overlay, then the envelope last.
pub fn resolve_params(
    trigger: &Trigger,
    schedule: Option<&Schedule>,
    strategy: ParamStrategy,
    envelope: Option<String>,
) -> Params {
    let mut params = schedule.map(schedule_params).unwrap_or_default();
    strategy.apply(trigger, &mut params);
    if let Some(envelope) = envelope {
        params.insert(EVENT_ENVELOPE_PARAM.to_string(), envelope);
    }
    params
}
