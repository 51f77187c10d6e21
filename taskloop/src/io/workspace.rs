//! Per-record workspaces: one git worktree per higher-level record, bound to its own branch.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::task::reference_stem;
use crate::io::git::Git;

/// A resolved workspace location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub slug: String,
    pub branch: String,
    pub path: PathBuf,
}

/// Mutations `ensure` performed. Empty when the workspace was already valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceAction {
    CreatedBranch,
    RemovedStale,
    AddedWorktree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub workspace: Workspace,
    pub actions: Vec<WorkspaceAction>,
}

/// What to do with uncommitted changes left in a workspace after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Drop tracked modifications and untracked files.
    Discard,
    /// Stage everything and commit it with the given message.
    Absorb,
}

pub struct WorkspaceManager {
    git: Git,
    workspaces_dir: PathBuf,
    branch_prefix: String,
    default_branch: String,
}

impl WorkspaceManager {
    pub fn new(
        root: &Path,
        state_dir: &Path,
        branch_prefix: &str,
        default_branch: &str,
    ) -> Self {
        Self {
            git: Git::new(root),
            workspaces_dir: state_dir.join("workspaces"),
            branch_prefix: branch_prefix.to_string(),
            default_branch: default_branch.to_string(),
        }
    }

    /// Where the workspace for `record` lives, without touching anything.
    ///
    /// Fails when the record's name has no alphanumeric characters to build a slug from.
    pub fn locate(&self, record: &str) -> Result<Workspace> {
        let slug = slug(record);
        if slug.is_empty() {
            bail!("record {record} has no usable name for a workspace");
        }
        Ok(Workspace {
            branch: format!("{}{slug}", self.branch_prefix),
            path: self.workspaces_dir.join(&slug),
            slug,
        })
    }

    /// Create or repair the workspace for `record`.
    #[instrument(skip_all, fields(record))]
    pub fn ensure(&self, record: &str) -> Result<EnsureOutcome> {
        let workspace = self.locate(record)?;
        let mut actions = Vec::new();

        if !self.git.branch_exists(&workspace.branch)? {
            info!(branch = %workspace.branch, from = %self.default_branch, "creating workspace branch");
            self.git
                .create_branch(&workspace.branch, &self.default_branch)?;
            actions.push(WorkspaceAction::CreatedBranch);
        }

        let attached = self.is_attached(&workspace.path)?;
        if attached {
            debug!(path = %workspace.path.display(), "workspace already valid");
            return Ok(EnsureOutcome { workspace, actions });
        }

        if workspace.path.exists() {
            warn!(path = %workspace.path.display(), "workspace directory is not an attached worktree, recreating");
            fs::remove_dir_all(&workspace.path)
                .with_context(|| format!("remove {}", workspace.path.display()))?;
            actions.push(WorkspaceAction::RemovedStale);
        }
        // Drops metadata left by a manually deleted worktree so `add` can reuse the branch.
        self.git.worktree_prune()?;

        fs::create_dir_all(&self.workspaces_dir)
            .with_context(|| format!("create {}", self.workspaces_dir.display()))?;
        self.git.worktree_add(&workspace.path, &workspace.branch)?;
        actions.push(WorkspaceAction::AddedWorktree);
        info!(path = %workspace.path.display(), branch = %workspace.branch, "workspace ready");
        Ok(EnsureOutcome { workspace, actions })
    }

    fn is_attached(&self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let wanted = canonical(path);
        let listed = self.git.worktree_list()?;
        Ok(listed
            .iter()
            .any(|entry| !entry.prunable && canonical(&entry.path) == wanted))
    }
}

/// Apply a reconcile action to the working copy at `workdir`. Returns true if a commit was made.
#[instrument(skip_all, fields(workdir = %workdir.display(), mode = ?mode))]
pub fn reconcile(workdir: &Path, mode: Reconcile, message: &str) -> Result<bool> {
    let git = Git::new(workdir);
    match mode {
        Reconcile::Discard => {
            git.discard_changes()?;
            Ok(false)
        }
        Reconcile::Absorb => {
            git.add_all()?;
            let committed = git.commit_staged(message)?;
            if committed {
                info!("committed leftover agent changes");
            }
            Ok(committed)
        }
    }
}

/// Lowercased file stem with every non-alphanumeric run collapsed to `-`.
pub fn slug(record: &str) -> String {
    let stem = reference_stem(record).to_ascii_lowercase();
    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
