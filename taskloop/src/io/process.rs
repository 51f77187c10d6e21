//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Stdout and stderr merged into one diagnostic string.
    pub fn combined(&self) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).to_string();
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stdout_truncated + self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[truncated {} bytes]",
                self.stdout_truncated + self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str("\n[timed out]");
        }
        buf
    }
}

/// Run `sh -c <expr>` in `cwd`.
pub fn run_shell(
    expr: &str,
    cwd: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(expr).current_dir(cwd);
    run_command_with_timeout(cmd, timeout, output_limit_bytes)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            terminate(&mut child, Duration::ZERO)?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Put the child in its own process group so the whole tree can be signalled.
pub fn own_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = cmd;
}

/// SIGTERM the child's process group, wait up to `grace`, then SIGKILL it.
#[instrument(skip_all, fields(pid = child.id(), grace_secs = grace.as_secs()))]
pub fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    if !grace.is_zero() {
        signal_group(child.id(), false);
        if let Some(status) = child.wait_timeout(grace).context("wait after SIGTERM")? {
            debug!("child exited after SIGTERM");
            return Ok(status);
        }
        warn!("child ignored SIGTERM, killing");
    }
    signal_group(child.id(), true);
    // Direct kill covers platforms without process groups; ignore "already exited".
    let _ = child.kill();
    child.wait().context("wait after kill")
}

#[cfg(unix)]
fn signal_group(pid: u32, force: bool) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let signal = if force {
        Signal::SIGKILL
    } else {
        Signal::SIGTERM
    };
    if let Err(err) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!(pid, %err, "signal process group failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _force: bool) {}

/// True if a process with this id currently exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but owned by someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    pid == std::process::id()
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn captures_exit_status_and_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_shell(
            "echo out; echo err >&2; exit 3",
            temp.path(),
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert!(!out.success());
        let combined = out.combined();
        assert!(combined.contains("out"));
        assert!(combined.contains("err"));
    }

    #[test]
    fn truncates_beyond_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_shell(
            "printf '0123456789'",
            temp.path(),
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[test]
    fn kills_the_whole_group_on_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let start = Instant::now();
        // The inner sleep holds the pipes open unless the group is killed.
        let out = run_shell(
            "sleep 30 & sleep 30",
            temp.path(),
            Duration::from_millis(300),
            1000,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
    }
}
