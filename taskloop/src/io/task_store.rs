//! Read and rewrite work-item files under the tasks directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::task::{Status, Task, set_header_fields};
use crate::core::transitions::validate_transition;

/// The tasks directory and the records found in it.
#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.md"))
    }

    /// Names (file stems) of every `*.md` file, sorted. Dotfiles are skipped.
    pub fn names(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", self.dir.display()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            names.push(stem.to_string());
        }
        names.sort();
        Ok(names)
    }

    /// Load every parseable record, sorted by name. Malformed files are skipped with a warning.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn load_all(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for name in self.names()? {
            match self.load(&name) {
                Ok(task) => tasks.push(task),
                Err(err) => warn!(task = %name, err = %format!("{err:#}"), "skipping unparseable work item"),
            }
        }
        debug!(count = tasks.len(), "loaded work items");
        Ok(tasks)
    }

    pub fn load(&self, name: &str) -> Result<Task> {
        let path = self.path_for(name);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Task::parse(name, &contents).with_context(|| format!("parse {}", path.display()))
    }

    /// Rewrite header fields of one record, leaving every other byte untouched.
    pub fn write_fields(&self, name: &str, updates: &[(&str, Option<String>)]) -> Result<()> {
        let path = self.path_for(name);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let updated = set_header_fields(&contents, updates)
            .with_context(|| format!("update header of {}", path.display()))?;
        super::write_atomic(&path, &updated)
    }

    /// Move a record to `to`, rejecting illegal transitions. `extra` fields are written alongside.
    #[instrument(skip_all, fields(task = %name, to = %to))]
    pub fn transition(
        &self,
        name: &str,
        to: Status,
        extra: &[(&str, Option<String>)],
    ) -> Result<()> {
        let current = self.load(name)?;
        validate_transition(current.status, to)?;
        let mut updates: Vec<(&str, Option<String>)> =
            vec![("status", Some(to.as_str().to_string()))];
        updates.extend(extra.iter().cloned());
        self.write_fields(name, &updates)?;
        debug!(from = ?current.status, "status updated");
        Ok(())
    }

    /// Delete a record file.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(anyhow!("no such work item {}", path.display()));
        }
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))
    }
}
