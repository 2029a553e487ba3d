//! Filesystem watches for watch triggers, backed by `notify`.
//!
//! Each watch owns its own `RecommendedWatcher` inside a tokio task; the
//! watcher is dropped (and the OS watch released) when the task ends.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Fail early for paths that cannot be watched.
pub fn check_watchable(path: &Path) -> Result<(), String> {
    match std::fs::metadata(path) {
        Ok(_) => Ok(()),
        Err(e) => Err(format!("cannot watch {}: {e}", path.display())),
    }
}

/// Start watching `path` recursively. `on_change` gets the changed path, at most
/// once per `debounce` window, until `cancel` fires.
pub fn spawn_watch<F>(
    path: &Path,
    debounce: Duration,
    cancel: CancellationToken,
    on_change: F,
) -> Result<JoinHandle<()>, notify::Error>
where
    F: Fn(PathBuf) + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if !is_change(&event.kind) {
                    return;
                }
                if let Some(changed) = event.paths.into_iter().next() {
                    // Receiver gone means the watch is shutting down.
                    let _ = tx.send(changed);
                }
            }
            Err(e) => tracing::warn!("⚠️ Watch error: {e}"),
        },
        Config::default(),
    )?;
    watcher.watch(path, RecursiveMode::Recursive)?;

    let root = path.to_path_buf();
    Ok(tokio::spawn(async move {
        let _watcher = watcher;
        let mut last_fire: Option<Instant> = None;
        tracing::debug!("👀 Watching {}", root.display());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.recv() => {
                    let Some(changed) = changed else { break };
                    let now = Instant::now();
                    if last_fire.is_some_and(|last| now.duration_since(last) < debounce) {
                        continue;
                    }
                    last_fire = Some(now);
                    on_change(changed);
                }
            }
        }

        tracing::debug!("Stopped watching {}", root.display());
    }))
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
