//! Shell command executor.
//!
//! A Module runs its steps in order through the configured shell inside a
//! per-workflow workspace directory. A Flow runs its member modules in order.
//! The first failing step ends the run.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reconflow_core::{
    CoreError, ExecutionContext, Executor, Params, Result, RunResult, RunStatus, Workflow,
    WorkflowKind,
};

/// Runs workflow steps as shell commands.
#[derive(Debug, Default, Clone)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn run_module(
        &self,
        ctx: &ExecutionContext,
        module: &Workflow,
        params: &Params,
    ) -> Result<RunStatus> {
        let mut merged = module.params.clone();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let workspace = workspace_dir(&ctx.config.executor.workspace_dir, &module.name);
        tokio::fs::create_dir_all(&workspace).await?;
        let timeout = Duration::from_secs(ctx.config.executor.step_timeout_secs.max(1));

        for step in &module.steps {
            if ctx.cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }
            let command = render(&step.command, &merged)
                .map_err(|e| CoreError::Execution(format!("{}/{}: {e}", module.name, step.name)))?;
            tracing::debug!("▶️ {}/{}: {command}", module.name, step.name);

            let child = tokio::process::Command::new(&ctx.config.executor.shell)
                .arg("-c")
                .arg(&command)
                .current_dir(&workspace)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| CoreError::Execution(format!("{}/{}: spawn failed: {e}", module.name, step.name)))?;

            // Dropping the wait future drops the child, which kills it.
            let output = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    tracing::info!("🛑 {}/{} cancelled", module.name, step.name);
                    return Ok(RunStatus::Cancelled);
                }
                output = tokio::time::timeout(timeout, child.wait_with_output()) => output,
            };

            match output {
                Ok(Ok(out)) if out.status.success() => {}
                Ok(Ok(out)) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    tracing::warn!(
                        "⚠️ {}/{} exited with {}: {}",
                        module.name,
                        step.name,
                        out.status.code().unwrap_or(-1),
                        tail(stderr.trim(), 500)
                    );
                    return Ok(RunStatus::Failed);
                }
                Ok(Err(e)) => {
                    tracing::warn!("⚠️ {}/{} failed: {e}", module.name, step.name);
                    return Ok(RunStatus::Failed);
                }
                Err(_) => {
                    tracing::warn!(
                        "⏰ {}/{} timed out after {}s",
                        module.name,
                        step.name,
                        timeout.as_secs()
                    );
                    return Ok(RunStatus::Failed);
                }
            }
        }

        Ok(RunStatus::Completed)
    }

    async fn load_module(&self, ctx: &ExecutionContext, name: &str) -> Result<Workflow> {
        let loader = Arc::clone(&ctx.loader);
        let owned = name.to_string();
        let module = tokio::task::spawn_blocking(move || loader.load_workflow(&owned))
            .await
            .map_err(|e| CoreError::Execution(format!("loading module {name}: {e}")))??;
        if module.kind != WorkflowKind::Module {
            return Err(CoreError::Workflow(format!("flow member '{name}' is not a module")));
        }
        Ok(module)
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute_flow(
        &self,
        ctx: &ExecutionContext,
        workflow: &Workflow,
        params: &Params,
    ) -> Result<RunResult> {
        let start_time = Utc::now();
        let mut flow_params = workflow.params.clone();
        flow_params.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut status = RunStatus::Completed;
        for name in &workflow.modules {
            let module = self.load_module(ctx, name).await?;
            tracing::info!("📦 {} → module {}", workflow.name, module.name);
            status = self.run_module(ctx, &module, &flow_params).await?;
            if status != RunStatus::Completed {
                break;
            }
        }

        Ok(RunResult {
            status,
            start_time,
            end_time: Utc::now(),
        })
    }

    async fn execute_module(
        &self,
        ctx: &ExecutionContext,
        workflow: &Workflow,
        params: &Params,
    ) -> Result<RunResult> {
        let start_time = Utc::now();
        let status = self.run_module(ctx, workflow, params).await?;
        Ok(RunResult {
            status,
            start_time,
            end_time: Utc::now(),
        })
    }
}

/// Fill `{{key}}` / `{{ key }}` placeholders with shell-quoted values, so each
/// value reaches the command as a single word. Unknown placeholders stay as-is.
pub fn render(template: &str, params: &Params) -> std::result::Result<String, shlex::QuoteError> {
    let mut rendered = template.to_string();
    for (key, value) in params {
        let quoted = shlex::try_quote(value)?;
        rendered = rendered
            .replace(&format!("{{{{{key}}}}}"), &quoted)
            .replace(&format!("{{{{ {key} }}}}"), &quoted);
    }
    Ok(rendered)
}

fn workspace_dir(root: &str, workflow: &str) -> PathBuf {
    let root = shellexpand::tilde(root);
    let safe: String = workflow
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    Path::new(root.as_ref()).join(safe)
}

fn tail(s: &str, max: usize) -> &str {
    let start = s.len().saturating_sub(max);
    let start = (start..s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(s.len());
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockLoader;
    use reconflow_core::ReconflowConfig;
    use tokio_util::sync::CancellationToken;

    fn ctx(workspace: &Path, loader: MockLoader, timeout_secs: u64) -> ExecutionContext {
        let mut config = ReconflowConfig::default();
        config.executor.workspace_dir = workspace.display().to_string();
        config.executor.step_timeout_secs = timeout_secs;
        ExecutionContext::manual(CancellationToken::new(), Arc::new(loader), Arc::new(config))
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_render() {
        let p = params(&[("target", "example.com"), ("depth", "2")]);
        assert_eq!(
            render("scan {{target}} --depth {{ depth }} {{missing}}", &p).unwrap(),
            "scan example.com --depth 2 {{missing}}"
        );
    }

    #[test]
    fn test_render_quotes_shell_metacharacters() {
        let p = params(&[("target", "example.com; touch pwned")]);
        let rendered = render("echo {{target}}", &p).unwrap();
        assert_eq!(rendered, "echo 'example.com; touch pwned'");
        assert!(render("echo {{target}}", &params(&[("target", "a\u{0}b")])).is_err());
    }

    #[tokio::test]
    async fn test_param_values_cannot_inject_commands() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), MockLoader::default(), 30);
        let module = Workflow::module("echo").with_step("echo", "echo {{target}} > out.txt");

        let run = CommandExecutor::new()
            .execute_module(&ctx, &module, &params(&[("target", "example.com; touch pwned")]))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let workspace = dir.path().join("echo");
        assert!(!workspace.join("pwned").exists());
        let out = std::fs::read_to_string(workspace.join("out.txt")).unwrap();
        assert_eq!(out, "example.com; touch pwned\n");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("héllo", 4), "llo");
        assert_eq!(tail("ok", 10), "ok");
    }

    #[tokio::test]
    async fn test_module_runs_steps_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), MockLoader::default(), 30);
        let mut module = Workflow::module("enum subdomains")
            .with_step("write", "echo {{target}} > out.txt")
            .with_step("append", "echo {{depth}} >> out.txt");
        module.params.insert("depth".into(), "1".into());

        let run = CommandExecutor::new()
            .execute_module(&ctx, &module, &params(&[("target", "example.com")]))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.end_time >= run.start_time);

        let out = std::fs::read_to_string(dir.path().join("enum_subdomains").join("out.txt")).unwrap();
        assert_eq!(out, "example.com\n1\n");
    }

    #[tokio::test]
    async fn test_failing_step_stops_module() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), MockLoader::default(), 30);
        let module = Workflow::module("m")
            .with_step("fail", "echo nope >&2; exit 3")
            .with_step("never", "touch ran.txt");

        let run = CommandExecutor::new()
            .execute_module(&ctx, &module, &Params::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(!dir.path().join("m").join("ran.txt").exists());
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), MockLoader::default(), 1);
        let module = Workflow::module("slow").with_step("sleep", "sleep 10");

        let run = CommandExecutor::new()
            .execute_module(&ctx, &module, &Params::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.duration().num_seconds() < 5);
    }

    #[tokio::test]
    async fn test_cancel_kills_running_step() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), MockLoader::default(), 60);
        let module = Workflow::module("slow").with_step("sleep", "sleep 10");

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let run = CommandExecutor::new()
            .execute_module(&ctx, &module, &Params::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_flow_runs_member_modules() {
        let dir = tempfile::tempdir().unwrap();
        let loader = MockLoader::with(vec![
            Workflow::module("first").with_step("a", "echo {{target}} > first.txt"),
            Workflow::module("second").with_step("b", "echo done > second.txt"),
        ]);
        let ctx = ctx(dir.path(), loader, 30);
        let mut flow = Workflow::flow("pipeline");
        flow.modules = vec!["first".into(), "second".into()];

        let run = CommandExecutor::new()
            .execute_flow(&ctx, &flow, &params(&[("target", "example.com")]))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(dir.path().join("first").join("first.txt").exists());
        assert!(dir.path().join("second").join("second.txt").exists());
    }

    #[tokio::test]
    async fn test_flow_with_unknown_module_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), MockLoader::default(), 30);
        let mut flow = Workflow::flow("pipeline");
        flow.modules = vec!["ghost".into()];

        let err = CommandExecutor::new()
            .execute_flow(&ctx, &flow, &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::WorkflowNotFound(_)));
    }
}
