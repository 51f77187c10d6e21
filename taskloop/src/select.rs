//! Queue scan: load every item, report stale actives, pick the next runnable one.

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::context::OrchestratorContext;
use crate::core::selector::{DoneCache, Readiness, next_runnable, readiness};
use crate::core::task::{Status, Task};
use crate::io::conditions::{DoneReport, check_done};
use crate::io::process::is_process_alive;

/// An item left `active` by a process that no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleActive {
    pub name: String,
    pub pid: Option<u32>,
}

/// Result of one scheduling pass.
#[derive(Debug, Clone)]
pub struct QueueScan {
    pub tasks: Vec<Task>,
    pub next: Option<Task>,
    pub stale: Vec<StaleActive>,
    /// Readiness of every item in name order.
    pub readiness: Vec<(String, Readiness)>,
}

/// Evaluate Done for one item against its execution directory.
pub fn done_report(ctx: &OrchestratorContext, task: &Task) -> DoneReport {
    let workdir = ctx.done_workdir(task);
    check_done(&task.body.done_conditions(), &ctx.eval_context(&workdir))
}

/// One pass over the queue. Done is evaluated at most once per item.
#[instrument(skip_all)]
pub fn scan(ctx: &OrchestratorContext) -> Result<QueueScan> {
    let tasks = ctx.store().load_all()?;
    let stale = stale_actives(&tasks);
    for item in &stale {
        warn!(task = %item.name, pid = ?item.pid, "work item left active by a dead process");
    }

    let mut cache = DoneCache::new(|task: &Task| done_report(ctx, task).is_done());
    let next = next_runnable(&tasks, &mut cache).cloned();
    let readiness = tasks
        .iter()
        .map(|task| (task.name.clone(), readiness(task, &tasks, &mut cache)))
        .collect();
    debug!(next = ?next.as_ref().map(|t| &t.name), "queue scanned");

    Ok(QueueScan {
        tasks,
        next,
        stale,
        readiness,
    })
}

/// Active items not owned by `holder`. With the run lock held by `holder`,
/// no other orchestrator can be working on any of them, whatever their pid says.
pub fn abandoned_actives(tasks: &[Task], holder: u32) -> Vec<StaleActive> {
    tasks
        .iter()
        .filter(|t| t.status == Some(Status::Active) && t.pid != Some(holder))
        .map(|t| StaleActive {
            name: t.name.clone(),
            pid: t.pid,
        })
        .collect()
}

/// Active items whose recorded process is gone (diagnostic only; pids get reused).
pub fn stale_actives(tasks: &[Task]) -> Vec<StaleActive> {
    tasks
        .iter()
        .filter(|t| t.status == Some(Status::Active))
        .filter(|t| !t.pid.is_some_and(is_process_alive))
        .map(|t| StaleActive {
            name: t.name.clone(),
            pid: t.pid,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestRepo, task};
    use std::process::Command;

    #[test]
    fn dead_pid_actives_are_stale() {
        let mut child = Command::new("true").spawn().expect("spawn");
        let dead = child.id();
        child.wait().expect("wait");
        let own = std::process::id().to_string();
        let dead = dead.to_string();

        let tasks = vec![
            task("2025-01-01-a", &[("status", "active"), ("pid", &dead)]),
            task("2025-01-02-b", &[("status", "active"), ("pid", &own)]),
            task("2025-01-03-c", &[("status", "active")]),
            task("2025-01-04-d", &[]),
        ];
        let names: Vec<String> = stale_actives(&tasks).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["2025-01-01-a", "2025-01-03-c"]);
    }

    #[test]
    fn lock_holder_owns_every_other_active_item() {
        let own = std::process::id().to_string();
        let tasks = vec![
            task("2025-01-01-a", &[("status", "active"), ("pid", "1")]),
            task("2025-01-02-b", &[("status", "active"), ("pid", &own)]),
            task("2025-01-03-c", &[("status", "active")]),
            task("2025-01-04-d", &[("status", "suspended"), ("pid", "1")]),
        ];
        let names: Vec<String> = abandoned_actives(&tasks, std::process::id())
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["2025-01-01-a", "2025-01-03-c"]);
    }

    #[test]
    fn scan_skips_items_whose_done_already_holds() {
        let repo = TestRepo::new().expect("repo");
        repo.write_task(
            "2025-01-01-readme",
            "title: Readme",
            "Write it.\n\n## Done\n- file_exists(\"README.md\")\n",
        )
        .expect("task");
        repo.write_task(
            "2025-01-02-license",
            "title: License",
            "Add one.\n\n## Done\n- file_exists(\"LICENSE\")\n",
        )
        .expect("task");
        let ctx = repo.context();

        let scan = scan(&ctx).expect("scan");
        assert_eq!(scan.next.map(|t| t.name).as_deref(), Some("2025-01-02-license"));
        assert_eq!(
            scan.readiness[0],
            ("2025-01-01-readme".to_string(), Readiness::AlreadyDone)
        );
        assert!(scan.stale.is_empty());
    }
}
