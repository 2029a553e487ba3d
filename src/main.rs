//! # Reconflow: trigger-driven recon workflow runner
//!
//! Usage:
//!   reconflow init                                   # Write a default config
//!   reconflow serve                                  # Run triggers until Ctrl-C
//!   reconflow emit --topic recon.new-domain --data example.com
//!   reconflow triggers                               # List triggers and their validity
//!   reconflow schedule set --workflow scan --trigger nightly --target example.com
//!   reconflow schedule disable <id>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use reconflow_core::{Event, ReconflowConfig, Schedule, Trigger, TriggerKind, WorkflowLoader};
use reconflow_scheduler::{CommandExecutor, EventReceiver, FileWorkflowLoader, SchedulerDb};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "reconflow",
    version,
    about = "⏰ Reconflow: cron, event and watch triggers for recon workflows"
)]
struct Cli {
    /// Config file (default: ~/.reconflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file if none exists
    Init,
    /// Start the event receiver and run triggers until Ctrl-C
    Serve,
    /// Queue an event; the next `serve` start replays it
    Emit {
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "")]
        data: String,
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        data_type: String,
    },
    /// List workflow triggers and whether they would register
    Triggers,
    /// Manage persisted schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Create or update the schedule of a workflow trigger
    Set {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        trigger: String,
        #[arg(long, default_value = "")]
        target: String,
        /// key=value, repeatable; values are passed to runs as strings
        #[arg(long = "param")]
        params: Vec<String>,
        /// Create the schedule disabled
        #[arg(long)]
        disabled: bool,
    },
    Enable { id: String },
    Disable { id: String },
    List,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&str>) -> Result<ReconflowConfig> {
    let config = match path {
        Some(p) => ReconflowConfig::load_from(&expand_path(p))?,
        None => ReconflowConfig::load()?,
    };
    Ok(config)
}

fn open_db(config: &ReconflowConfig) -> Result<SchedulerDb> {
    let path = expand_path(&config.server.db_path);
    SchedulerDb::open(&path).with_context(|| format!("opening {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "reconflow=debug,reconflow_scheduler=debug,reconflow_core=debug"
    } else {
        "reconflow=info,reconflow_scheduler=info,reconflow_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match cli.command {
        Command::Init => return init(cli.config.as_deref()),
        _ => load_config(cli.config.as_deref())?,
    };
    match cli.command {
        Command::Init => Ok(()),
        Command::Serve => serve(config).await,
        Command::Emit {
            topic,
            data,
            source,
            name,
            data_type,
        } => {
            let db = open_db(&config)?;
            let event = Event::new(&topic, &data)
                .with_source(&source)
                .with_name(&name)
                .with_data_type(&data_type);
            let id = db.record_event(&event)?;
            println!("📨 Queued event #{id} on '{topic}' ({})", event.id);
            Ok(())
        }
        Command::Triggers => list_triggers(&config),
        Command::Schedule { action } => schedule(&config, action),
    }
}

fn init(path: Option<&str>) -> Result<()> {
    let path = path.map(expand_path).unwrap_or_else(ReconflowConfig::default_path);
    if path.exists() {
        println!("⚠️  Config already exists at {}", path.display());
        return Ok(());
    }
    ReconflowConfig::default().save_to(&path)?;
    std::fs::create_dir_all(expand_path(&ReconflowConfig::default().server.workflows_dir))?;
    println!("✅ Wrote default config to {}", path.display());
    Ok(())
}

async fn serve(config: ReconflowConfig) -> Result<()> {
    let workflows_dir = expand_path(&config.server.workflows_dir);
    let db = Arc::new(open_db(&config)?);
    let receiver = EventReceiver::builder()
        .loader(Arc::new(FileWorkflowLoader::new(&workflows_dir)))
        .executor(Arc::new(CommandExecutor::new()))
        .schedule_store(db.clone())
        .event_log(db.clone())
        .config(Arc::new(config))
        .build()?;

    let shutdown = CancellationToken::new();
    receiver.start(&shutdown).await?;

    let stats = db.event_log_stats()?;
    tracing::info!(
        "🚀 Reconflow serving workflows from {} ({} queued event(s), {} failed)",
        workflows_dir.display(),
        stats.pending,
        stats.failed
    );
    for info in receiver.registered_triggers_info().await {
        tracing::info!(
            "   {} / {} [{}]{}",
            info.workflow_name,
            info.trigger_name,
            info.kind,
            info.topic.map(|t| format!(" on '{t}'")).unwrap_or_default()
        );
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    receiver.stop().await;
    shutdown.cancel();
    Ok(())
}

fn list_triggers(config: &ReconflowConfig) -> Result<()> {
    let loader = FileWorkflowLoader::new(expand_path(&config.server.workflows_dir));
    let outcome = loader.load_all_workflows()?;

    for failure in &outcome.failures {
        println!("❌ {}: {}", failure.path.display(), failure.reason);
    }
    for workflow in &outcome.workflows {
        println!("📦 {} ({})", workflow.name, workflow.kind);
        for trigger in &workflow.triggers {
            let status = trigger_status(trigger);
            let state = if trigger.enabled { "" } else { " (disabled)" };
            println!("   {} [{}]{state} {status}", trigger.name, trigger.kind);
        }
    }
    Ok(())
}

fn trigger_status(trigger: &Trigger) -> String {
    if let Some(field) = trigger.missing_field() {
        return format!("❌ missing '{field}'");
    }
    match trigger.kind {
        TriggerKind::Cron => {
            let expr = trigger.cron_expression().unwrap_or_default();
            match reconflow_scheduler::cron::parse_cron(expr) {
                Ok(schedule) => match reconflow_scheduler::cron::next_run_from_cron(&schedule, Utc::now()) {
                    Some(next) => format!("✅ next {}", next.to_rfc3339()),
                    None => "✅ no upcoming runs".to_string(),
                },
                Err(e) => format!("❌ {e}"),
            }
        }
        TriggerKind::Watch => {
            let raw = trigger.path.as_deref().unwrap_or(Path::new(""));
            let path = reconflow_scheduler::watch::expand_path(raw);
            match reconflow_scheduler::watch::check_watchable(&path) {
                Ok(()) => format!("✅ {}", path.display()),
                Err(e) => format!("❌ {e}"),
            }
        }
        TriggerKind::Event => format!("✅ topic '{}'", trigger.topic().unwrap_or_default()),
    }
}

/// Split a `key=value` flag. The value is stored as a JSON string so that
/// `depth=2` reaches runs as "2".
fn parse_param(param: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = param
        .split_once('=')
        .with_context(|| format!("--param '{param}' must be key=value"))?;
    let key = key.trim();
    anyhow::ensure!(!key.is_empty(), "--param '{param}' has an empty key");
    Ok((key.to_string(), serde_json::Value::String(value.to_string())))
}

fn schedule(config: &ReconflowConfig, action: ScheduleAction) -> Result<()> {
    let db = open_db(config)?;
    match action {
        ScheduleAction::Set {
            workflow,
            trigger,
            target,
            params,
            disabled,
        } => {
            let mut schedule = db
                .find_schedule(&workflow, &trigger)?
                .unwrap_or_else(|| Schedule::new(&workflow, &trigger, ""));
            schedule.target = target;
            schedule.is_enabled = !disabled;
            for param in &params {
                let (key, value) = parse_param(param)?;
                schedule.params.insert(key, value);
            }
            schedule.updated_at = Utc::now();
            db.save_schedule(&schedule)?;
            println!("✅ Schedule {} → {}/{}", schedule.id, workflow, trigger);
            println!("   Reference it from the trigger with `schedule_id: {}`", schedule.id);
        }
        ScheduleAction::Enable { id } => {
            db.set_schedule_enabled(&id, true)?;
            println!("▶️ Enabled {id}");
        }
        ScheduleAction::Disable { id } => {
            db.set_schedule_enabled(&id, false)?;
            println!("⏸️ Disabled {id}");
        }
        ScheduleAction::List => {
            for s in db.list_schedules()? {
                println!(
                    "{} {} {}/{} target='{}' params={}",
                    if s.is_enabled { "✅" } else { "⏸️" },
                    s.id,
                    s.workflow_name,
                    s.trigger_name,
                    s.target,
                    serde_json::Value::Object(s.params)
                );
            }
        }
    }
    Ok(())
}
