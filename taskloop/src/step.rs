//! Execution of a single work item: start, invoke, evaluate, record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agent::{AgentRunner, InvokeOutcome, InvokeRequest};
use crate::context::OrchestratorContext;
use crate::core::task::{Status, Task};
use crate::io::conditions::{DoneReport, check_done};
use crate::io::git::Git;
use crate::io::persona::{Persona, load_persona};
use crate::io::prompt::PromptBuilder;
use crate::io::workspace::{Reconcile, reconcile};

/// How an executed item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    /// Done holds; `commit` is the execution directory's HEAD.
    Completed { commit: String },
    /// The agent succeeded but Done does not hold.
    Suspended { report: DoneReport },
    /// The agent (or its setup) failed.
    Failed,
}

/// Summary of one executed item.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub task: String,
    /// Working directory the agent ran in, if it got that far.
    pub workdir: Option<PathBuf>,
    pub session_id: Option<String>,
    pub result: ItemResult,
}

/// Run one work item through its whole lifecycle.
///
/// Every status write is committed on the root before this returns, on every path.
#[instrument(skip_all, fields(task = %task.name))]
pub fn run_item<R: AgentRunner>(
    ctx: &OrchestratorContext,
    runner: &R,
    prompts: &PromptBuilder,
    task: &Task,
) -> Result<StepOutcome> {
    let store = ctx.store();
    let name = task.name.as_str();
    eprintln!("==> {name}: {}", task.title);

    let branch = planned_branch(ctx, task)?;
    store.transition(
        name,
        Status::Active,
        &[
            ("pid", Some(std::process::id().to_string())),
            ("branch", branch),
            ("stop_reason", None),
            ("session", None),
            ("commit", None),
        ],
    )?;
    commit_record(ctx, name, &format!("Start: {name}"))?;

    let workdir = match resolve_workdir(ctx, task) {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("  workspace setup failed: {err:#}");
            return fail(ctx, task, None, None);
        }
    };

    let invoked = prepare_request(ctx, prompts, task, &workdir)
        .and_then(|request| runner.invoke(&request));
    let outcome = match invoked {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("  agent invocation failed: {err:#}");
            InvokeOutcome::default()
        }
    };
    if !outcome.succeeded {
        return fail(ctx, task, Some(workdir), outcome.session_id);
    }

    let report = check_done(&task.body.done_conditions(), &ctx.eval_context(&workdir));
    if let Err(err) = reconcile(&workdir, Reconcile::Absorb, &format!("Agent work: {name}")) {
        warn!(err = %format!("{err:#}"), "could not commit leftover agent changes");
    }

    let session = outcome.session_id.clone();
    let result = if report.is_done() {
        let commit = Git::new(&workdir).head_sha()?;
        store.transition(
            name,
            Status::Completed,
            &[("commit", Some(commit.clone())), ("session", session)],
        )?;
        commit_record(ctx, name, &format!("Complete: {name}"))?;
        info!(commit = %commit, "work item completed");
        eprintln!("  completed at {}", short(&commit));
        ItemResult::Completed { commit }
    } else {
        store.transition(name, Status::Suspended, &[("session", session)])?;
        commit_record(ctx, name, &format!("Incomplete: {name}"))?;
        info!(completion = ?report.completion, "work item suspended");
        eprintln!("  Done conditions not met, suspending:\n{}", indent(&report.render()));
        ItemResult::Suspended { report }
    };

    Ok(StepOutcome {
        task: task.name.clone(),
        workdir: Some(workdir),
        session_id: outcome.session_id,
        result,
    })
}

fn fail(
    ctx: &OrchestratorContext,
    task: &Task,
    workdir: Option<PathBuf>,
    session_id: Option<String>,
) -> Result<StepOutcome> {
    let name = task.name.as_str();
    if let Some(dir) = workdir.as_deref()
        && let Err(err) = reconcile(dir, Reconcile::Discard, "")
    {
        warn!(err = %format!("{err:#}"), "could not discard agent changes");
    }
    ctx.store().transition(
        name,
        Status::Stopped,
        &[
            ("stop_reason", Some("failed".to_string())),
            ("session", session_id.clone()),
        ],
    )?;
    commit_record(ctx, name, &format!("Failed: {name}"))?;
    warn!("work item failed");
    eprintln!("  failed, stopping");
    Ok(StepOutcome {
        task: task.name.clone(),
        workdir,
        session_id,
        result: ItemResult::Failed,
    })
}

/// Branch the item will run on: its parent's workspace branch, or the root's current branch.
///
/// `None` when the parent cannot have a workspace; workspace setup then fails the item.
fn planned_branch(ctx: &OrchestratorContext, task: &Task) -> Result<Option<String>> {
    match task.parent.as_deref() {
        Some(parent) => Ok(ctx.workspaces().locate(parent).ok().map(|ws| ws.branch)),
        None => ctx.git().current_branch().map(Some),
    }
}

/// Items with a parent get that record's workspace; maintenance items run in the root.
fn resolve_workdir(ctx: &OrchestratorContext, task: &Task) -> Result<PathBuf> {
    match task.parent.as_deref() {
        Some(parent) => {
            ctx.ensure_state_dir()?;
            Ok(ctx.workspaces().ensure(parent)?.workspace.path)
        }
        None => Ok(ctx.root.clone()),
    }
}

fn prepare_request(
    ctx: &OrchestratorContext,
    prompts: &PromptBuilder,
    task: &Task,
    workdir: &Path,
) -> Result<InvokeRequest> {
    let persona: Option<Persona> = match task.agent.as_deref() {
        Some(reference) => Some(load_persona(&ctx.agents_dir(), reference)?),
        None => None,
    };
    Ok(InvokeRequest {
        label: task.name.clone(),
        prompt: prompts.render_task(task, &ctx.config.tasks_dir)?,
        tools: task
            .tools
            .clone()
            .unwrap_or_else(|| ctx.config.default_tools.clone()),
        persona,
        workdir: workdir.to_path_buf(),
    })
}

/// Commit a task file's metadata change on the root.
pub(crate) fn commit_record(ctx: &OrchestratorContext, name: &str, message: &str) -> Result<()> {
    let git = ctx.git();
    let relpath = ctx.task_relpath(name);
    git.add_paths(&[relpath.as_path()])
        .with_context(|| format!("stage {}", relpath.display()))?;
    git.commit_staged(message)?;
    Ok(())
}

fn short(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}
