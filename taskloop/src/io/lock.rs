//! Single-instance run lock: a pid file under the state directory.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::io::process::is_process_alive;

pub const LOCK_FILE: &str = "run.pid";

/// Another live orchestrator holds the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHeldError {
    pub pid: u32,
    pub path: PathBuf,
}

impl fmt::Display for LockHeldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "another run is in progress (pid {}, lock {})",
            self.pid,
            self.path.display()
        )
    }
}

impl std::error::Error for LockHeldError {}

/// Held lock. Dropping it removes the pid file.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    pid: u32,
}

impl RunLock {
    /// Acquire the lock in `state_dir`, reclaiming it from a dead holder.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("create {}", state_dir.display()))?;
        let path = state_dir.join(LOCK_FILE);
        let pid = std::process::id();

        // Two attempts: the second follows removal of a stale file.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{pid}").with_context(|| format!("write {}", path.display()))?;
                    debug!(pid, path = %path.display(), "run lock acquired");
                    return Ok(Self { path, pid });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    match read_holder(&path)? {
                        Some(holder) if holder != pid && is_process_alive(holder) => {
                            return Err(LockHeldError { pid: holder, path }.into());
                        }
                        holder => {
                            info!(?holder, "reclaiming stale run lock");
                            match fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(err) if err.kind() == ErrorKind::NotFound => {}
                                Err(err) => {
                                    return Err(err)
                                        .with_context(|| format!("remove {}", path.display()));
                                }
                            }
                        }
                    }
                }
                Err(err) => return Err(err).with_context(|| format!("create {}", path.display())),
            }
        }
        // Lost a race with another starter that recreated the file.
        let holder = read_holder(&path)?.unwrap_or_default();
        Err(LockHeldError { pid: holder, path }.into())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Only remove a file we still own.
        if matches!(read_holder(&self.path), Ok(Some(pid)) if pid == self.pid)
            && let Err(err) = fs::remove_file(&self.path)
        {
            warn!(path = %self.path.display(), %err, "failed to release run lock");
        }
    }
}

/// Pid recorded in a lock file. Unparseable contents read as no holder.
fn read_holder(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<u32>().ok()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        child.wait().expect("wait");
        pid
    }

    #[test]
    fn acquire_writes_pid_and_drop_releases() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(LOCK_FILE);
        {
            let lock = RunLock::acquire(temp.path()).expect("acquire");
            assert_eq!(lock.pid(), std::process::id());
            let contents = fs::read_to_string(&path).expect("read");
            assert_eq!(contents.trim(), std::process::id().to_string());
        }
        assert!(!path.exists());
    }

    #[test]
    fn live_holder_blocks_acquire() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut holder = Command::new("sleep").arg("30").spawn().expect("spawn");
        fs::write(temp.path().join(LOCK_FILE), format!("{}\n", holder.id())).expect("write");

        let err = RunLock::acquire(temp.path()).unwrap_err();
        let held = err.downcast_ref::<LockHeldError>().expect("lock held");
        assert_eq!(held.pid, holder.id());

        holder.kill().expect("kill");
        holder.wait().expect("wait");
    }

    #[test]
    fn stale_or_garbage_lock_is_reclaimed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(LOCK_FILE);

        fs::write(&path, format!("{}\n", dead_pid())).expect("write");
        drop(RunLock::acquire(temp.path()).expect("reclaim stale"));

        fs::write(&path, "not a pid\n").expect("write");
        let lock = RunLock::acquire(temp.path()).expect("reclaim garbage");
        assert_eq!(lock.path(), path.as_path());
    }
}
