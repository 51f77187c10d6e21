//! Test-only helpers: throwaway git repositories and a scripted agent runner.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::agent::{AgentRunner, InvokeOutcome, InvokeRequest};
use crate::context::OrchestratorContext;
use crate::core::task::Task;
use crate::io::config::LoopConfig;
use crate::io::git::Git;
use crate::io::signals::Interrupt;

/// Temporary git repository on branch `main` with one commit (`chore: init`).
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = fs::canonicalize(temp.path()).context("resolve tempdir")?;
        git(&root, &["init", "--quiet"])?;
        git(&root, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        git(&root, &["config", "user.email", "loop@example.com"])?;
        git(&root, &["config", "user.name", "Task Loop"])?;
        git(&root, &["config", "commit.gpgsign", "false"])?;
        let repo = Self { _temp: temp, root };
        repo.write("README.md", "# Test\n")?;
        repo.commit_all("chore: init")?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a file relative to the root, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write `tasks/<name>.md` with the given header lines and body, then commit it.
    pub fn write_task(&self, name: &str, header: &str, body: &str) -> Result<PathBuf> {
        let path = self.write(
            &format!("tasks/{name}.md"),
            &format!("---\n{header}\n---\n{body}"),
        )?;
        self.commit_all(&format!("Add: {name}"))?;
        Ok(path)
    }

    /// Stage everything and commit. Returns false when there was nothing to commit.
    pub fn commit_all(&self, message: &str) -> Result<bool> {
        let git = Git::new(&self.root);
        git.add_all()?;
        git.commit_staged(message)
    }

    /// Context with default config, no idle sleep, and a fresh interrupt flag.
    pub fn context(&self) -> OrchestratorContext {
        let config = LoopConfig {
            idle_sleep_secs: 0,
            ..LoopConfig::default()
        };
        OrchestratorContext::new(&self.root, config, "main", Interrupt::new())
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !status.success() {
        bail!("git {} failed with {status}", args.join(" "));
    }
    Ok(())
}

/// Parse a task from `key: value` header pairs and an empty body.
pub fn task(name: &str, fields: &[(&str, &str)]) -> Task {
    let header: String = fields
        .iter()
        .map(|(k, v)| format!("{k}: {v}\n"))
        .collect();
    Task::parse(name, &format!("---\n{header}---\n")).unwrap_or_else(|err| {
        panic!("test task {name} does not parse: {err:#}");
    })
}

/// One canned agent invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub succeeded: bool,
    /// Files written relative to the request's workdir before returning.
    pub writes: Vec<(String, String)>,
    /// Commit everything in the workdir with this message after writing.
    pub commit: Option<String>,
    pub session_id: Option<String>,
}

impl ScriptedRun {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            ..Self::default()
        }
    }

    pub fn failure() -> Self {
        Self::default()
    }

    pub fn write(mut self, rel: &str, contents: &str) -> Self {
        self.writes.push((rel.to_string(), contents.to_string()));
        self
    }

    pub fn commit(mut self, message: &str) -> Self {
        self.commit = Some(message.to_string());
        self
    }

    pub fn session(mut self, id: &str) -> Self {
        self.session_id = Some(id.to_string());
        self
    }
}

/// Agent runner that replays [`ScriptedRun`]s in order and records every request.
pub struct ScriptedAgent {
    runs: RefCell<VecDeque<ScriptedRun>>,
    calls: RefCell<Vec<InvokeRequest>>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.borrow().clone()
    }
}

impl AgentRunner for ScriptedAgent {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutcome> {
        self.calls.borrow_mut().push(request.clone());
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent exhausted at {}", request.label))?;

        for (rel, contents) in &run.writes {
            let path = request.workdir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        if let Some(message) = &run.commit {
            let git = Git::new(&request.workdir);
            git.add_all()?;
            git.commit_staged(message)?;
        }
        Ok(InvokeOutcome {
            succeeded: run.succeeded,
            session_id: run.session_id,
        })
    }
}
