//! File-based workflow loader.
//! Workflows are YAML files (`*.yaml` / `*.yml`) anywhere under one directory;
//! human-readable and git-friendly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use reconflow_core::{CoreError, LoadFailure, LoadOutcome, Result, Workflow, WorkflowLoader};

/// Loads workflow definitions from a directory tree.
pub struct FileWorkflowLoader {
    dir: PathBuf,
}

impl FileWorkflowLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse one workflow file.
    pub fn parse_file(path: &Path) -> Result<Workflow> {
        let content = std::fs::read_to_string(path)?;
        let mut workflow: Workflow = serde_yaml::from_str(&content)
            .map_err(|e| CoreError::Workflow(format!("{}: {e}", path.display())))?;
        if workflow.name.trim().is_empty() {
            return Err(CoreError::Workflow(format!("{}: name is required", path.display())));
        }
        workflow.source_path = Some(path.to_path_buf());
        Ok(workflow)
    }

    /// Every workflow file under the directory, sorted for a stable load order.
    fn workflow_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        collect_yaml(&self.dir, &mut files)?;
        files.sort();
        Ok(files)
    }
}

impl WorkflowLoader for FileWorkflowLoader {
    fn load_all_workflows(&self) -> Result<LoadOutcome> {
        if !self.dir.exists() {
            tracing::warn!("⚠️ Workflows directory {} does not exist", self.dir.display());
            return Ok(LoadOutcome::default());
        }

        let mut outcome = LoadOutcome::default();
        let mut seen = HashSet::new();
        for path in self.workflow_files()? {
            match Self::parse_file(&path) {
                Ok(workflow) if !seen.insert(workflow.name.clone()) => {
                    outcome.failures.push(LoadFailure {
                        reason: format!("duplicate workflow name '{}'", workflow.name),
                        path,
                    });
                }
                Ok(workflow) => outcome.workflows.push(workflow),
                Err(e) => outcome.failures.push(LoadFailure {
                    path,
                    reason: e.to_string(),
                }),
            }
        }

        tracing::debug!(
            "📂 Loaded {} workflow(s) from {} ({} failed)",
            outcome.workflows.len(),
            self.dir.display(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    fn load_workflow(&self, name: &str) -> Result<Workflow> {
        for path in self.workflow_files()? {
            match Self::parse_file(&path) {
                Ok(workflow) if workflow.name == name => return Ok(workflow),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping {}: {e}", path.display()),
            }
        }
        Err(CoreError::WorkflowNotFound(name.to_string()))
    }
}

fn collect_yaml(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_yaml(&path, files)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        ) {
            files.push(path);
        }
    }
    Ok(())
}
