//! Work-item orchestrator for coding-agent CLIs.
//!
//! Reads `tasks/*.md` from a git repository, runs the next runnable item with
//! the detected agent CLI, and records every status change as a commit.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use taskloop::agent::cli::CliAgent;
use taskloop::context::OrchestratorContext;
use taskloop::core::selector::Readiness;
use taskloop::core::task::reference_stem;
use taskloop::exit_codes;
use taskloop::io::lock::LockHeldError;
use taskloop::io::signals::Interrupt;
use taskloop::io::workspace::WorkspaceAction;
use taskloop::logging;
use taskloop::looping::{LoopOptions, LoopStop, run_loop};
use taskloop::select::{done_report, scan};

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Drive a coding-agent CLI through a queue of markdown work items"
)]
struct Cli {
    /// Orchestrator root (the git repository holding `tasks/`).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Raise log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run work items until one fails or suspends, planning when the queue is empty.
    Run {
        /// Run at most one item.
        #[arg(long)]
        once: bool,
    },
    /// Print the name of the next runnable item.
    Next,
    /// Evaluate one item's Done conditions and print the breakdown.
    Check {
        /// Item name or path (`tasks/2025-01-01-x.md`).
        task: String,
    },
    /// List every item with its status and readiness.
    List,
    /// Create (or repair) a record's workspace and print its path.
    Workspace {
        /// Record path, e.g. `projects/docs.md`.
        record: String,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            if let Some(held) = err.downcast_ref::<LockHeldError>() {
                eprintln!("{held}");
                exit_codes::LOCK_HELD
            } else {
                eprintln!("{err:#}");
                exit_codes::ERROR
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run { once } => cmd_run(&cli.root, once),
        Command::Next => cmd_next(&cli.root),
        Command::Check { task } => cmd_check(&cli.root, &task),
        Command::List => cmd_list(&cli.root),
        Command::Workspace { record } => cmd_workspace(&cli.root, &record),
    }
}

fn cmd_run(root: &Path, once: bool) -> Result<i32> {
    let interrupt = Interrupt::install()?;
    let ctx = OrchestratorContext::load(root, interrupt.clone())?;
    let runner = CliAgent::detect(&ctx.config.agent, ctx.run_log_path(), interrupt)?;

    let outcome = run_loop(&ctx, &runner, LoopOptions { once }, |_| {})?;
    let code = match &outcome.stop {
        _ if ctx.interrupt.is_set() => {
            eprintln!("interrupted");
            exit_codes::INTERRUPTED
        }
        LoopStop::Idle => {
            eprintln!("nothing runnable ({} item(s) run)", outcome.items_run);
            exit_codes::OK
        }
        LoopStop::Once => exit_codes::OK,
        LoopStop::MaxIterations { limit } => {
            eprintln!("stopped after {limit} iteration(s)");
            exit_codes::OK
        }
        LoopStop::Interrupted => exit_codes::INTERRUPTED,
        LoopStop::Failed { task } => {
            eprintln!("stopped: {task} failed");
            exit_codes::STOPPED
        }
        LoopStop::Suspended { task } => {
            eprintln!("stopped: {task} is suspended until its Done conditions hold");
            exit_codes::STOPPED
        }
        LoopStop::PlannerFailed => {
            eprintln!("stopped: planner failed");
            exit_codes::STOPPED
        }
    };
    Ok(code)
}

fn cmd_next(root: &Path) -> Result<i32> {
    let ctx = OrchestratorContext::load(root, Interrupt::new())?;
    let queue = scan(&ctx)?;
    for stale in &queue.stale {
        eprintln!(
            "warning: {} is active but its process ({}) is gone; it will be closed on the next run",
            stale.name,
            stale.pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
        );
    }
    match queue.next {
        Some(task) => {
            println!("{}", task.name);
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("nothing runnable");
            Ok(exit_codes::NOTHING_RUNNABLE)
        }
    }
}

fn cmd_check(root: &Path, reference: &str) -> Result<i32> {
    let ctx = OrchestratorContext::load(root, Interrupt::new())?;
    let task = ctx.store().load(reference_stem(reference))?;
    let report = done_report(&ctx, &task);
    println!("{}", report.render());
    println!(
        "{}: {}",
        task.name,
        if report.is_done() { "done" } else { "not done" }
    );
    Ok(exit_codes::OK)
}

fn cmd_list(root: &Path) -> Result<i32> {
    let ctx = OrchestratorContext::load(root, Interrupt::new())?;
    let queue = scan(&ctx)?;
    for (task, (_, readiness)) in queue.tasks.iter().zip(&queue.readiness) {
        println!(
            "{}\t{}\t{}",
            task.name,
            task.effective_status(),
            describe(readiness)
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_workspace(root: &Path, record: &str) -> Result<i32> {
    let ctx = OrchestratorContext::load(root, Interrupt::new())?;
    ctx.ensure_state_dir()?;
    let outcome = ctx.workspaces().ensure(record)?;
    for action in &outcome.actions {
        let line = match action {
            WorkspaceAction::CreatedBranch => format!("created branch {}", outcome.workspace.branch),
            WorkspaceAction::RemovedStale => "removed a stale workspace directory".to_string(),
            WorkspaceAction::AddedWorktree => "added worktree".to_string(),
        };
        eprintln!("{line}");
    }
    println!("{}", outcome.workspace.path.display());
    Ok(exit_codes::OK)
}

fn describe(readiness: &Readiness) -> String {
    match readiness {
        Readiness::Runnable => "runnable".to_string(),
        Readiness::AlreadyDone => "done".to_string(),
        Readiness::NotQueued(_) => "-".to_string(),
        Readiness::WaitingOn(name) => format!("waiting on {name}"),
        Readiness::MissingPrevious(name) => format!("previous {name} not found"),
    }
}
