//! The main loop: run items until one fails or suspends, planning when the queue is empty.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::agent::AgentRunner;
use crate::context::OrchestratorContext;
use crate::core::task::Status;
use crate::io::prompt::PromptBuilder;
use crate::plan::{PlanOutcome, run_planner};
use crate::select::{StaleActive, abandoned_actives, scan};
use crate::step::{ItemResult, StepOutcome, commit_record, run_item};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// An item's agent run failed; it is now stopped/failed.
    Failed { task: String },
    /// An item ran but its Done conditions do not hold.
    Suspended { task: String },
    /// The planner invocation failed.
    PlannerFailed,
    /// Nothing runnable and planning produced nothing (or is not configured).
    Idle,
    /// `--once` finished its item.
    Once,
    /// The configured `max_iterations` was reached.
    MaxIterations { limit: u32 },
    /// An interrupt arrived between steps.
    Interrupted,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopOptions {
    /// Stop after one executed item, and when planning yields nothing runnable.
    pub once: bool,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub items_run: u32,
    pub items_planned: u32,
    pub iterations: u32,
    pub stop: LoopStop,
}

/// Hold the run lock and process the queue.
///
/// Errors (git, filesystem, lock contention) stop the loop immediately; item
/// failures end it with a [`LoopStop`].
#[instrument(skip_all, fields(once = options.once))]
pub fn run_loop<R: AgentRunner, F: FnMut(&StepOutcome)>(
    ctx: &OrchestratorContext,
    runner: &R,
    options: LoopOptions,
    mut on_step: F,
) -> Result<LoopOutcome> {
    let lock = ctx.acquire_lock()?;
    let prompts = PromptBuilder::new()?;
    close_abandoned_actives(ctx, lock.pid())?;

    let mut outcome = LoopOutcome {
        items_run: 0,
        items_planned: 0,
        iterations: 0,
        stop: LoopStop::Idle,
    };
    let limit = ctx.config.max_iterations;

    loop {
        if ctx.interrupt.is_set() {
            outcome.stop = LoopStop::Interrupted;
            break;
        }
        if limit > 0 && outcome.iterations >= limit {
            info!(limit, "iteration limit reached");
            outcome.stop = LoopStop::MaxIterations { limit };
            break;
        }
        outcome.iterations += 1;

        let queue = scan(ctx)?;
        if let Some(task) = queue.next {
            let step = run_item(ctx, runner, &prompts, &task)?;
            outcome.items_run += 1;
            on_step(&step);
            match step.result {
                ItemResult::Completed { .. } if options.once => {
                    outcome.stop = LoopStop::Once;
                    break;
                }
                ItemResult::Completed { .. } => continue,
                ItemResult::Suspended { .. } => {
                    outcome.stop = LoopStop::Suspended { task: step.task };
                    break;
                }
                ItemResult::Failed => {
                    outcome.stop = LoopStop::Failed { task: step.task };
                    break;
                }
            }
        }

        match run_planner(ctx, runner, &prompts, &queue.tasks)? {
            PlanOutcome::Created(_) => outcome.items_planned += 1,
            PlanOutcome::Failed => {
                outcome.stop = LoopStop::PlannerFailed;
                break;
            }
            PlanOutcome::Unavailable => {
                outcome.stop = LoopStop::Idle;
                break;
            }
            PlanOutcome::Nothing if options.once => {
                outcome.stop = LoopStop::Idle;
                break;
            }
            PlanOutcome::Nothing => idle(ctx, ctx.config.idle_sleep()),
        }
    }

    info!(stop = ?outcome.stop, items = outcome.items_run, "loop finished");
    Ok(outcome)
}

/// Items left active by an earlier run are closed as stopped/abandoned, never resumed.
///
/// Called with the run lock held by `holder`, so a live pid on the record only
/// means the number was reused.
fn close_abandoned_actives(ctx: &OrchestratorContext, holder: u32) -> Result<Vec<StaleActive>> {
    let store = ctx.store();
    let stale = abandoned_actives(&store.load_all()?, holder);
    for item in &stale {
        warn!(task = %item.name, pid = ?item.pid, "closing work item abandoned by an earlier run");
        eprintln!("  {} was left active by an earlier run, marking it stopped", item.name);
        store.transition(
            &item.name,
            Status::Stopped,
            &[("stop_reason", Some("abandoned".to_string()))],
        )?;
        commit_record(ctx, &item.name, &format!("Abandoned: {}", item.name))?;
    }
    Ok(stale)
}

/// Sleep up to `total`, waking early on interrupt.
fn idle(ctx: &OrchestratorContext, total: Duration) {
    if total.is_zero() {
        return;
    }
    info!(secs = total.as_secs(), "nothing runnable, sleeping");
    let deadline = Instant::now() + total;
    while !ctx.interrupt.is_set() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(Duration::from_millis(200)));
    }
}
