//! # Reconflow Core
//!
//! Data model, configuration and collaborator traits shared by the scheduler
//! and the CLI.
//!
//! ```text
//! Workflow (flow | module)
//!   └── Trigger (cron | event | watch)
//!         ├── schedule_id → Schedule (target, params, is_enabled)
//!         └── vars        → resolved against an Event
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod schedule;
pub mod traits;
pub mod workflow;

pub use config::ReconflowConfig;
pub use error::{CoreError, Result, StoreError};
pub use event::Event;
pub use schedule::{EventLogRow, Schedule, decode_string_params};
pub use traits::{
    EventLogStore, ExecutionContext, Executor, LoadFailure, LoadOutcome, Params, RunResult,
    RunStatus, ScheduleStore, WorkflowLoader,
};
pub use workflow::{Step, Trigger, TriggerKind, Workflow, WorkflowKind};
