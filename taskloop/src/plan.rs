//! Planner invocation: when nothing is runnable, ask the agent for at most one new item.

use std::collections::BTreeSet;
use std::fs;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::agent::{AgentRunner, InvokeRequest};
use crate::context::OrchestratorContext;
use crate::core::task::Task;
use crate::io::prompt::{PlannerInputs, PromptBuilder, QueueEntry};
use crate::io::workspace::{Reconcile, reconcile};
use crate::step::commit_record;

const RECENT_COMMITS: usize = 10;
pub const PLANNER_LABEL: &str = "planner";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// A new item was created and committed.
    Created(String),
    /// The planner ran but produced nothing usable.
    Nothing,
    /// No planner prompt file exists.
    Unavailable,
    /// The planner invocation itself failed.
    Failed,
}

#[instrument(skip_all)]
pub fn run_planner<R: AgentRunner>(
    ctx: &OrchestratorContext,
    runner: &R,
    prompts: &PromptBuilder,
    tasks: &[Task],
) -> Result<PlanOutcome> {
    let plan_path = ctx.planner_prompt_path();
    if !plan_path.exists() {
        info!(path = %plan_path.display(), "no planner prompt, skipping planning");
        return Ok(PlanOutcome::Unavailable);
    }
    let plan = fs::read_to_string(&plan_path)
        .with_context(|| format!("read {}", plan_path.display()))?;

    let store = ctx.store();
    let before: BTreeSet<String> = store.names()?.into_iter().collect();
    let prompt = prompts.render_planner(&PlannerInputs {
        plan,
        queue: tasks.iter().map(QueueEntry::from_task).collect(),
        recent_commits: ctx.git().log_subjects(RECENT_COMMITS)?,
        tasks_dir: ctx.config.tasks_dir.clone(),
        today: Local::now().format("%Y-%m-%d").to_string(),
    })?;

    eprintln!("==> nothing runnable, planning");
    let request = InvokeRequest {
        label: PLANNER_LABEL.to_string(),
        prompt,
        tools: ctx.config.default_tools.clone(),
        persona: None,
        workdir: ctx.root.clone(),
    };
    let succeeded = match runner.invoke(&request) {
        Ok(outcome) => outcome.succeeded,
        Err(err) => {
            eprintln!("  planner invocation failed: {err:#}");
            false
        }
    };
    if !succeeded {
        if let Err(err) = reconcile(&ctx.root, Reconcile::Discard, "") {
            warn!(err = %format!("{err:#}"), "could not discard planner changes");
        }
        warn!("planner failed");
        return Ok(PlanOutcome::Failed);
    }

    let created: Vec<String> = store
        .names()?
        .into_iter()
        .filter(|name| !before.contains(name))
        .collect();
    let Some((kept, surplus)) = created.split_first() else {
        info!("planner created no work item");
        eprintln!("  planner created nothing");
        return Ok(PlanOutcome::Nothing);
    };
    for extra in surplus {
        warn!(task = %extra, "planner created more than one item, deleting extra");
        store.remove(extra)?;
    }
    if let Err(err) = store.load(kept) {
        warn!(task = %kept, err = %format!("{err:#}"), "planner output is not a valid work item, deleting");
        store.remove(kept)?;
        return Ok(PlanOutcome::Nothing);
    }

    commit_record(ctx, kept, &format!("Plan: {kept}"))?;
    eprintln!("  planned {kept}");
    Ok(PlanOutcome::Created(kept.clone()))
}
