//! One streaming agent attempt.
//!
//! Two reader threads push stdout and stderr lines onto a channel; a single
//! coordinator loop consumes them, parses events, prints progress, and
//! enforces the heartbeat, the absolute timeout, and interrupts. Readers whose
//! stream closed are joined before [`run_attempt`] returns; a reader still
//! blocked on a pipe held by an escaped descendant is detached.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::agent::provider::{AgentEvent, AgentProvider, progress_line};
use crate::agent::run_log::RunLog;
use crate::io::process::{own_process_group, terminate};
use crate::io::signals::Interrupt;

const TICK: Duration = Duration::from_millis(100);

/// Timing and output bounds for an attempt.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub heartbeat: Duration,
    pub timeout: Option<Duration>,
    pub grace: Duration,
    pub progress_width: usize,
    pub diagnostic_limit_bytes: usize,
}

/// Why the coordinator stopped the child itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    TimedOut,
    Interrupted,
}

/// What one attempt produced.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub status: Option<ExitStatus>,
    pub terminated: Option<Termination>,
    pub session_id: Option<String>,
    /// The terminal result event flagged an error.
    pub result_error: bool,
    /// Captured stderr, bounded.
    pub stderr: String,
    /// Non-JSON stdout lines, bounded.
    pub garbage: Vec<String>,
    pub heartbeats: u32,
}

impl AttemptResult {
    pub fn succeeded(&self) -> bool {
        self.terminated.is_none()
            && !self.result_error
            && self.status.is_some_and(|s| s.success())
    }
}

#[derive(Clone, Copy)]
enum Source {
    Stdout,
    Stderr,
}

impl Source {
    fn index(self) -> usize {
        match self {
            Source::Stdout => 0,
            Source::Stderr => 1,
        }
    }
}

enum Line {
    Text(Source, String),
    Closed(Source),
}

/// Spawn `cmd` and coordinate it until it exits or is terminated.
#[instrument(skip_all, fields(provider = provider.name()))]
pub fn run_attempt(
    mut cmd: Command,
    provider: &dyn AgentProvider,
    settings: &StreamSettings,
    interrupt: &Interrupt,
    log: &mut RunLog,
) -> Result<AttemptResult> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    let mut child = cmd.spawn().context("spawn agent command")?;
    debug!(pid = child.id(), "agent started");
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let readers = [
        spawn_reader(stdout, Source::Stdout, tx.clone()),
        spawn_reader(stderr, Source::Stderr, tx),
    ];

    let mut state = Coordinator::new(provider, settings);
    let started = Instant::now();
    let mut closed = [false; 2];
    let mut status: Option<ExitStatus> = None;
    let mut exited_at: Option<Instant> = None;

    loop {
        match rx.recv_timeout(TICK) {
            Ok(Line::Text(Source::Stdout, line)) => state.stdout_line(&line, log),
            Ok(Line::Text(Source::Stderr, line)) => state.stderr_line(&line, log),
            Ok(Line::Closed(source)) => closed[source.index()] = true,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => closed = [true; 2],
        }

        if status.is_none()
            && let Some(exit) = child.try_wait().context("poll agent")?
        {
            debug!(code = ?exit.code(), "agent exited");
            status = Some(exit);
            exited_at = Some(Instant::now());
        }
        if status.is_some() && closed.iter().all(|c| *c) {
            break;
        }
        // A grandchild still holds the pipes after the agent exited.
        if let Some(at) = exited_at
            && at.elapsed() >= settings.grace.max(TICK)
        {
            warn!("agent exited but its output pipes stayed open, killing its process group");
            terminate(&mut child, Duration::ZERO)?;
            break;
        }

        if status.is_none() {
            if interrupt.is_set() {
                warn!("interrupted, terminating agent");
                eprintln!("  interrupted, stopping agent");
                state.terminated = Some(Termination::Interrupted);
            } else if let Some(limit) = settings.timeout
                && started.elapsed() >= limit
            {
                warn!(timeout_secs = limit.as_secs(), "agent timed out, terminating");
                eprintln!("  agent exceeded {}s timeout, stopping", limit.as_secs());
                state.terminated = Some(Termination::TimedOut);
            }
            if state.terminated.is_some() {
                status = Some(terminate(&mut child, settings.grace)?);
                break;
            }
            state.heartbeat();
        }
    }

    drain(&rx, &mut state, log, &mut closed, settings.grace.max(Duration::from_secs(1)));
    drop(rx);
    for (reader, done) in readers.into_iter().zip(closed) {
        if !done {
            // Joining would block until whoever holds the pipe exits.
            warn!("agent output pipe still held by a detached process, abandoning its reader");
            continue;
        }
        if reader.join().is_err() {
            warn!("agent output reader panicked");
        }
    }

    Ok(state.finish(status))
}

/// Consume whatever the readers still deliver, bounded by `limit`.
fn drain(
    rx: &Receiver<Line>,
    state: &mut Coordinator<'_>,
    log: &mut RunLog,
    closed: &mut [bool; 2],
    limit: Duration,
) {
    let deadline = Instant::now() + limit;
    while !closed.iter().all(|c| *c) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("agent output did not close after termination");
            return;
        }
        match rx.recv_timeout(remaining) {
            Ok(Line::Text(Source::Stdout, line)) => state.stdout_line(&line, log),
            Ok(Line::Text(Source::Stderr, line)) => state.stderr_line(&line, log),
            Ok(Line::Closed(source)) => closed[source.index()] = true,
            Err(RecvTimeoutError::Disconnected) => {
                *closed = [true; 2];
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("agent output did not close after termination");
                return;
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    source: Source,
    tx: Sender<Line>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send(Line::Text(source, line)).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = tx.send(Line::Closed(source));
    })
}

struct Coordinator<'a> {
    provider: &'a dyn AgentProvider,
    settings: &'a StreamSettings,
    last_activity: Instant,
    heartbeats: u32,
    session_id: Option<String>,
    result_error: bool,
    stderr: String,
    stderr_dropped: usize,
    garbage: Vec<String>,
    garbage_bytes: usize,
    terminated: Option<Termination>,
}

impl<'a> Coordinator<'a> {
    fn new(provider: &'a dyn AgentProvider, settings: &'a StreamSettings) -> Self {
        Self {
            provider,
            settings,
            last_activity: Instant::now(),
            heartbeats: 0,
            session_id: None,
            result_error: false,
            stderr: String::new(),
            stderr_dropped: 0,
            garbage: Vec::new(),
            garbage_bytes: 0,
            terminated: None,
        }
    }

    fn stdout_line(&mut self, line: &str, log: &mut RunLog) {
        if line.trim().is_empty() {
            return;
        }
        log.event(line);
        self.last_activity = Instant::now();
        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                for event in self.provider.parse_event(value) {
                    self.observe(&event);
                }
            }
            Err(_) => {
                debug!(line, "non-JSON stdout line");
                if self.garbage_bytes < self.settings.diagnostic_limit_bytes {
                    self.garbage_bytes += line.len();
                    self.garbage.push(line.to_string());
                }
            }
        }
    }

    fn stderr_line(&mut self, line: &str, log: &mut RunLog) {
        log.note("stderr", line);
        if self.stderr.len() + line.len() < self.settings.diagnostic_limit_bytes {
            self.stderr.push_str(line);
            self.stderr.push('\n');
        } else {
            self.stderr_dropped += line.len() + 1;
        }
    }

    fn observe(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Session(id) => {
                debug!(session = %id, "agent session started");
                self.session_id = Some(id.clone());
            }
            AgentEvent::Finished {
                session_id,
                is_error,
                ..
            } => {
                if let Some(id) = session_id {
                    self.session_id = Some(id.clone());
                }
                self.result_error = *is_error;
            }
            AgentEvent::Message(text) => debug!(chars = text.len(), "agent message"),
            AgentEvent::ToolStarted { .. } | AgentEvent::ToolCompleted { .. } | AgentEvent::Other => {}
        }
        if let Some(line) = progress_line(event, self.settings.progress_width) {
            eprintln!("{line}");
        }
    }

    fn heartbeat(&mut self) {
        let idle = self.last_activity.elapsed();
        if idle >= self.settings.heartbeat {
            self.heartbeats += 1;
            eprintln!("  still working ({}s without output)", idle.as_secs());
            self.last_activity = Instant::now();
        }
    }

    fn finish(self, status: Option<ExitStatus>) -> AttemptResult {
        let mut stderr = self.stderr;
        if self.stderr_dropped > 0 {
            stderr.push_str(&format!("[{} more bytes of stderr dropped]\n", self.stderr_dropped));
        }
        AttemptResult {
            status,
            terminated: self.terminated,
            session_id: self.session_id,
            result_error: self.result_error,
            stderr,
            garbage: self.garbage,
            heartbeats: self.heartbeats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::claude::Claude;
    use crate::agent::run_log::RUN_LOG_FILE;
    use std::fs;

    fn settings() -> StreamSettings {
        StreamSettings {
            heartbeat: Duration::from_secs(60),
            timeout: None,
            grace: Duration::from_millis(500),
            progress_width: 80,
            diagnostic_limit_bytes: 4_000,
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn parses_events_and_keeps_garbage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join(RUN_LOG_FILE);
        let mut log = RunLog::create(&log_path, "t").expect("log");
        let script = r#"
echo '{"type":"system","subtype":"init","session_id":"s-1"}'
echo 'not json at all'
echo 'warming up' >&2
echo '{"type":"result","session_id":"s-1","is_error":false}'
"#;
        let result = run_attempt(sh(script), &Claude, &settings(), &Interrupt::new(), &mut log)
            .expect("attempt");
        drop(log);

        assert!(result.succeeded());
        assert_eq!(result.session_id.as_deref(), Some("s-1"));
        assert_eq!(result.garbage, vec!["not json at all".to_string()]);
        assert!(result.stderr.contains("warming up"));
        let contents = fs::read_to_string(&log_path).expect("read log");
        assert_eq!(contents.lines().count(), 5);
    }

    #[test]
    fn result_error_fails_the_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = RunLog::create(&temp.path().join(RUN_LOG_FILE), "t").expect("log");
        let script = r#"echo '{"type":"result","is_error":true}'"#;
        let result = run_attempt(sh(script), &Claude, &settings(), &Interrupt::new(), &mut log)
            .expect("attempt");
        assert!(!result.succeeded());
    }

    #[test]
    fn timeout_terminates_the_process_group() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = RunLog::create(&temp.path().join(RUN_LOG_FILE), "t").expect("log");
        let mut cfg = settings();
        cfg.timeout = Some(Duration::from_millis(500));
        let started = Instant::now();
        let result = run_attempt(
            sh("sleep 60 & sleep 60"),
            &Claude,
            &cfg,
            &Interrupt::new(),
            &mut log,
        )
        .expect("attempt");
        assert_eq!(result.terminated, Some(Termination::TimedOut));
        assert!(!result.succeeded());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn interrupt_stops_the_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = RunLog::create(&temp.path().join(RUN_LOG_FILE), "t").expect("log");
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let result = run_attempt(sh("sleep 60"), &Claude, &settings(), &interrupt, &mut log)
            .expect("attempt");
        assert_eq!(result.terminated, Some(Termination::Interrupted));
    }

    #[test]
    fn escaped_descendant_holding_stdout_does_not_block() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = RunLog::create(&temp.path().join(RUN_LOG_FILE), "t").expect("log");
        let mut cfg = settings();
        cfg.timeout = Some(Duration::from_secs(2));
        let started = Instant::now();
        let result = run_attempt(
            sh(r#"echo '{"type":"result","is_error":false}'; setsid sleep 20 & exit 0"#),
            &Claude,
            &cfg,
            &Interrupt::new(),
            &mut log,
        )
        .expect("attempt");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(result.succeeded());
    }

    #[test]
    fn heartbeat_fires_without_aborting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = RunLog::create(&temp.path().join(RUN_LOG_FILE), "t").expect("log");
        let mut cfg = settings();
        cfg.heartbeat = Duration::from_millis(200);
        let result = run_attempt(
            sh(r#"sleep 1; echo '{"type":"result","is_error":false}'"#),
            &Claude,
            &cfg,
            &Interrupt::new(),
            &mut log,
        )
        .expect("attempt");
        assert!(result.heartbeats >= 1);
        assert!(result.succeeded());
    }
}
