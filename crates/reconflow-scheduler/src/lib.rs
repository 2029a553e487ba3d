//! # Reconflow Scheduler
//!
//! Decides when workflows run unattended and hands them to an executor.
//!
//! ## Architecture
//! ```text
//! EventReceiver (start/stop, workflow cache, recovery)
//!   └── Scheduler
//!         ├── Cron:  "0 2 * * *"        → timer task
//!         ├── Watch: ~/scopes/inbox     → notify watcher task
//!         └── Event: "recon.new-domain" → emit_event fan-out
//!               └── on fire → Dispatcher (one task per fire)
//!                     ├── Schedule lookup (SchedulerDb)
//!                     ├── ParamStrategy: vars | legacy input | fired input
//!                     └── Executor (execute_flow / execute_module)
//! ```
//!
//! Events persisted while the receiver was down are replayed once at Start.

pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod loader;
pub mod params;
pub mod persistence;
pub mod receiver;
pub mod recovery;
pub mod vars;
pub mod watch;

#[cfg(test)]
mod test_support;

pub use dispatch::Dispatcher;
pub use engine::{FiredEvent, FiredTrigger, Scheduler};
pub use error::{ReceiverError, SchedulerError};
pub use executor::CommandExecutor;
pub use loader::FileWorkflowLoader;
pub use params::{EVENT_ENVELOPE_PARAM, ParamStrategy, resolve_params};
pub use persistence::{EventLogStats, SchedulerDb};
pub use receiver::{EventReceiver, EventReceiverBuilder, RegisteredEventTrigger, TriggerInfo};
pub use recovery::RecoveryReport;
pub use vars::ResolvedVars;
