//! Deterministic selection of the next runnable work item.

use std::collections::HashMap;

use crate::core::task::{Status, Task, reference_stem};

/// Why an item is or is not runnable in the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Runnable,
    /// Done already holds; skipped without being marked.
    AlreadyDone,
    /// Not in the queue (active, suspended, or terminal).
    NotQueued(Status),
    /// `previous` names an item whose Done is still false.
    WaitingOn(String),
    /// `previous` names an item that does not exist.
    MissingPrevious(String),
}

/// Memoizes Done evaluation so a single pass sees one answer per item.
pub struct DoneCache<F> {
    eval: F,
    seen: HashMap<String, bool>,
}

impl<F: FnMut(&Task) -> bool> DoneCache<F> {
    pub fn new(eval: F) -> Self {
        Self {
            eval,
            seen: HashMap::new(),
        }
    }

    pub fn is_done(&mut self, task: &Task) -> bool {
        if let Some(done) = self.seen.get(&task.name) {
            return *done;
        }
        let done = (self.eval)(task);
        self.seen.insert(task.name.clone(), done);
        done
    }
}

/// Classify one item. `tasks` is the full store, used to resolve `previous`.
pub fn readiness<F: FnMut(&Task) -> bool>(
    task: &Task,
    tasks: &[Task],
    cache: &mut DoneCache<F>,
) -> Readiness {
    let status = task.effective_status();
    if status != Status::Backlog {
        return Readiness::NotQueued(status);
    }
    if cache.is_done(task) {
        return Readiness::AlreadyDone;
    }
    let Some(previous) = task.previous.as_deref() else {
        return Readiness::Runnable;
    };
    let stem = reference_stem(previous);
    match tasks.iter().find(|t| t.name == stem) {
        Some(prev) if cache.is_done(prev) => Readiness::Runnable,
        Some(prev) => Readiness::WaitingOn(prev.name.clone()),
        None => Readiness::MissingPrevious(stem.to_string()),
    }
}

/// First runnable item in name order (names are date-prefixed, so chronological).
pub fn next_runnable<'a, F: FnMut(&Task) -> bool>(
    tasks: &'a [Task],
    cache: &mut DoneCache<F>,
) -> Option<&'a Task> {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));
    ordered
        .into_iter()
        .find(|task| readiness(task, tasks, cache) == Readiness::Runnable)
}
