//! Prompt rendering for work items and the planner.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::task::Task;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");

/// One line of the planner's queue summary.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueueEntry {
    pub name: String,
    pub status: String,
}

impl QueueEntry {
    pub fn from_task(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            status: task.effective_status().as_str().to_string(),
        }
    }
}

/// Inputs for the planner prompt.
#[derive(Debug, Clone)]
pub struct PlannerInputs {
    pub plan: String,
    pub queue: Vec<QueueEntry>,
    pub recent_commits: Vec<String>,
    pub tasks_dir: String,
    pub today: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)
            .context("load task template")?;
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("load planner template")?;
        Ok(Self { env })
    }

    /// Render the prompt for a work item. Done conditions appear as acceptance criteria.
    pub fn render_task(&self, task: &Task, tasks_dir: &str) -> Result<String> {
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            name => task.name,
            title => task.title,
            instruction => task.body.instruction.trim(),
            context => task.body.section("context").filter(|s| !s.is_empty()),
            verify => task.body.section("verify").filter(|s| !s.is_empty()),
            acceptance => task.body.done_conditions(),
            tasks_dir => tasks_dir,
        })?;
        debug!(task = %task.name, bytes = rendered.len(), "rendered task prompt");
        Ok(rendered)
    }

    pub fn render_planner(&self, input: &PlannerInputs) -> Result<String> {
        let template = self.env.get_template("planner")?;
        let rendered = template.render(context! {
            plan => input.plan.trim(),
            queue => input.queue,
            commits => input.recent_commits,
            tasks_dir => input.tasks_dir,
            today => input.today,
        })?;
        debug!(bytes = rendered.len(), "rendered planner prompt");
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM: &str = "---\ntitle: Add readme\n---\nWrite a README.\n\n## Context\nNo docs yet.\n\n## Done\n- `file_exists(\"README.md\")`\n";

    #[test]
    fn task_prompt_includes_sections_and_acceptance() {
        let task = Task::parse("2025-01-01-add-readme", ITEM).expect("parse");
        let prompt = PromptBuilder::new()
            .expect("builder")
            .render_task(&task, "tasks")
            .expect("render");
        assert!(prompt.starts_with("# Add readme"));
        assert!(prompt.contains("Write a README."));
        assert!(prompt.contains("## Context\n\nNo docs yet."));
        assert!(!prompt.contains("## Verify"));
        assert!(prompt.contains("- `file_exists(\"README.md\")`"));
    }

    #[test]
    fn planner_prompt_lists_queue_and_commits() {
        let prompt = PromptBuilder::new()
            .expect("builder")
            .render_planner(&PlannerInputs {
                plan: "Keep the docs current.".to_string(),
                queue: vec![QueueEntry {
                    name: "2025-01-01-a".to_string(),
                    status: "completed".to_string(),
                }],
                recent_commits: vec!["abc1234 Complete: a".to_string()],
                tasks_dir: "tasks".to_string(),
                today: "2025-01-02".to_string(),
            })
            .expect("render");
        assert!(prompt.starts_with("Keep the docs current."));
        assert!(prompt.contains("- `2025-01-01-a`: completed"));
        assert!(prompt.contains("- abc1234 Complete: a"));
        assert!(prompt.contains("tasks/YYYY-MM-DD-<slug>.md"));
    }
}
