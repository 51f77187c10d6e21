//! Explicit orchestrator context: root paths, config, default branch, interrupt flag.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::agent::run_log::RUN_LOG_FILE;
use crate::core::task::Task;
use crate::io::conditions::EvalContext;
use crate::io::config::{CONFIG_FILE, LoopConfig, load_config};
use crate::io::git::Git;
use crate::io::lock::RunLock;
use crate::io::signals::Interrupt;
use crate::io::task_store::TaskStore;
use crate::io::workspace::WorkspaceManager;

/// Everything a scheduler call needs, passed explicitly.
#[derive(Debug, Clone)]
pub struct OrchestratorContext {
    pub root: PathBuf,
    pub config: LoopConfig,
    pub default_branch: String,
    pub interrupt: Interrupt,
}

impl OrchestratorContext {
    pub fn new(root: &Path, config: LoopConfig, default_branch: &str, interrupt: Interrupt) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            default_branch: default_branch.to_string(),
            interrupt,
        }
    }

    /// Read `taskloop.toml` and detect the default branch of the repository at `root`.
    pub fn load(root: &Path, interrupt: Interrupt) -> Result<Self> {
        let root = fs::canonicalize(root).with_context(|| format!("resolve {}", root.display()))?;
        let config = load_config(&root.join(CONFIG_FILE))?;
        let default_branch = Git::new(&root)
            .default_branch()
            .context("detect default branch")?;
        debug!(root = %root.display(), default_branch, "context loaded");
        Ok(Self::new(&root, config, &default_branch, interrupt))
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }

    pub fn store(&self) -> TaskStore {
        TaskStore::new(self.root.join(&self.config.tasks_dir))
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join(&self.config.agents_dir)
    }

    pub fn planner_prompt_path(&self) -> PathBuf {
        self.root.join(&self.config.planner_prompt_file)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(&self.config.state_dir)
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.state_dir().join(RUN_LOG_FILE)
    }

    /// Path of a task file relative to the root, as git wants it.
    pub fn task_relpath(&self, name: &str) -> PathBuf {
        Path::new(&self.config.tasks_dir).join(format!("{name}.md"))
    }

    pub fn workspaces(&self) -> WorkspaceManager {
        WorkspaceManager::new(
            &self.root,
            &self.state_dir(),
            &self.config.branch_prefix,
            &self.default_branch,
        )
    }

    /// Create the state directory and keep it out of version control.
    pub fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let ignore = dir.join(".gitignore");
        if !ignore.exists() {
            fs::write(&ignore, "*\n").with_context(|| format!("write {}", ignore.display()))?;
        }
        Ok(())
    }

    pub fn acquire_lock(&self) -> Result<RunLock> {
        self.ensure_state_dir()?;
        RunLock::acquire(&self.state_dir())
    }

    /// Where an item's Done conditions are evaluated: its parent's workspace if
    /// one exists on disk, else the root.
    pub fn done_workdir(&self, task: &Task) -> PathBuf {
        match task.parent.as_deref() {
            Some(parent) => {
                match self.workspaces().locate(parent) {
                    Ok(ws) if ws.path.exists() => ws.path,
                    _ => self.root.clone(),
                }
            }
            None => self.root.clone(),
        }
    }

    pub fn eval_context(&self, workdir: &Path) -> EvalContext {
        EvalContext {
            workdir: workdir.to_path_buf(),
            instructions: self.root.join(&self.config.instructions_file),
            command_timeout: self.config.condition_timeout(),
            output_limit_bytes: self.config.agent.diagnostic_limit_bytes,
        }
    }
}
