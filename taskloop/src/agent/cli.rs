//! [`AgentRunner`] backed by a detected agent CLI.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agent::detect::{Detected, detect};
use crate::agent::run_log::RunLog;
use crate::agent::stream::{AttemptResult, StreamSettings, Termination, run_attempt};
use crate::agent::{AgentRunner, InvokeOutcome, InvokeRequest};
use crate::io::config::AgentConfig;
use crate::io::signals::Interrupt;

const DIAGNOSTIC_TAIL_LINES: usize = 20;

pub struct CliAgent {
    detected: Detected,
    settings: StreamSettings,
    fallback_models: Vec<String>,
    retryable_errors: Vec<String>,
    log_path: PathBuf,
    interrupt: Interrupt,
}

impl CliAgent {
    /// Look up a provider once; the result is reused for every invocation.
    pub fn detect(config: &AgentConfig, log_path: PathBuf, interrupt: Interrupt) -> Result<Self> {
        let detected = detect(&config.providers)?;
        Ok(Self::with_detected(detected, config, log_path, interrupt))
    }

    pub fn with_detected(
        detected: Detected,
        config: &AgentConfig,
        log_path: PathBuf,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            detected,
            settings: StreamSettings {
                heartbeat: config.heartbeat(),
                timeout: config.timeout(),
                grace: config.grace(),
                progress_width: config.progress_width,
                diagnostic_limit_bytes: config.diagnostic_limit_bytes,
            },
            fallback_models: config.fallback_models.clone(),
            retryable_errors: config.retryable_errors.clone(),
            log_path,
            interrupt,
        }
    }

    /// Model candidates in order; `None` lets the CLI pick its default.
    fn models(&self) -> Vec<Option<String>> {
        if self.detected.provider.supports_fallback() && !self.fallback_models.is_empty() {
            self.fallback_models.iter().cloned().map(Some).collect()
        } else {
            vec![None]
        }
    }

    fn is_retryable(&self, attempt: &AttemptResult) -> bool {
        attempt.terminated.is_none()
            && self
                .retryable_errors
                .iter()
                .any(|needle| !needle.is_empty() && attempt.stderr.contains(needle.as_str()))
    }
}

impl AgentRunner for CliAgent {
    #[instrument(skip_all, fields(label = %request.label, provider = self.detected.provider.name()))]
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutcome> {
        let provider = self.detected.provider.as_ref();
        let prompt = request.effective_prompt();
        let tools = provider.map_tools(request.effective_tools());
        let mut log = RunLog::create(&self.log_path, &request.label)?;
        info!(workdir = %request.workdir.display(), tools = ?tools, "invoking agent");

        let models = self.models();
        for (idx, model) in models.iter().enumerate() {
            if let Some(model) = model {
                log.note("taskloop", &format!("model {model}"));
            }
            let mut cmd = provider.command(&self.detected.program, &prompt, &tools, model.as_deref());
            cmd.current_dir(&request.workdir);
            let attempt = run_attempt(cmd, provider, &self.settings, &self.interrupt, &mut log)
                .with_context(|| format!("run {}", self.detected.program.display()))?;

            if attempt.succeeded() {
                return Ok(InvokeOutcome {
                    succeeded: true,
                    session_id: attempt.session_id,
                });
            }

            let next = models.get(idx + 1).and_then(Option::as_deref);
            if let (Some(current), Some(next)) = (model.as_deref(), next)
                && self.is_retryable(&attempt)
            {
                warn!(model = current, next, "model unavailable, falling back");
                eprintln!("  model {current} unavailable, retrying with {next}");
                continue;
            }

            report_failure(&attempt, &log);
            return Ok(InvokeOutcome {
                succeeded: false,
                session_id: attempt.session_id,
            });
        }
        Ok(InvokeOutcome::default())
    }
}

/// Surface what the agent left behind: exit status, stderr tail, unparsed stdout.
fn report_failure(attempt: &AttemptResult, log: &RunLog) {
    let reason = match (attempt.terminated, attempt.status) {
        (Some(Termination::TimedOut), _) => "timed out".to_string(),
        (Some(Termination::Interrupted), _) => "interrupted".to_string(),
        (None, Some(status)) if !status.success() => format!("exit status {status}"),
        (None, _) if attempt.result_error => "result reported an error".to_string(),
        (None, _) => "no exit status".to_string(),
    };
    warn!(%reason, "agent invocation failed");
    eprintln!("  agent failed: {reason} (log: {})", log.path().display());
    let stderr: Vec<&str> = attempt.stderr.lines().collect();
    if !stderr.is_empty() {
        eprintln!("  stderr:");
        for line in &stderr[stderr.len().saturating_sub(DIAGNOSTIC_TAIL_LINES)..] {
            eprintln!("    {line}");
        }
    }
    if !attempt.garbage.is_empty() {
        eprintln!("  unparsed output:");
        for line in attempt.garbage.iter().take(DIAGNOSTIC_TAIL_LINES) {
            eprintln!("    {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::claude::Claude;
    use crate::agent::gemini::Gemini;
    use crate::agent::provider::AgentProvider;
    use std::fs;
    use std::path::Path;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        }
        path
    }

    fn agent(program: PathBuf, provider: Box<dyn AgentProvider>, dir: &Path) -> CliAgent {
        let config = AgentConfig {
            fallback_models: vec!["m-pro".to_string(), "m-flash".to_string()],
            retryable_errors: vec!["model not found".to_string()],
            grace_secs: 1,
            ..AgentConfig::default()
        };
        CliAgent::with_detected(
            Detected { program, provider },
            &config,
            dir.join("run.log"),
            Interrupt::new(),
        )
    }

    fn request(dir: &Path) -> InvokeRequest {
        InvokeRequest {
            label: "2025-01-01-a".to_string(),
            prompt: "Do it.".to_string(),
            tools: vec!["Read".to_string()],
            persona: None,
            workdir: dir.to_path_buf(),
        }
    }

    #[test]
    fn success_returns_session() {
        let temp = tempfile::tempdir().expect("tempdir");
        let program = script(
            temp.path(),
            "claude",
            r#"echo '{"type":"system","subtype":"init","session_id":"s-9"}'
echo '{"type":"result","session_id":"s-9","is_error":false}'"#,
        );
        let outcome = agent(program, Box::new(Claude), temp.path())
            .invoke(&request(temp.path()))
            .expect("invoke");
        assert_eq!(
            outcome,
            InvokeOutcome {
                succeeded: true,
                session_id: Some("s-9".to_string())
            }
        );
        let log = fs::read_to_string(temp.path().join("run.log")).expect("log");
        assert!(log.starts_with("=== 2025-01-01-a started"));
    }

    #[test]
    fn gemini_falls_back_on_retryable_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let calls = temp.path().join("calls");
        let program = script(
            temp.path(),
            "gemini",
            &format!(
                r#"echo "$*" >> {calls}
case "$*" in
  *m-pro*) echo 'error: model not found' >&2; exit 1 ;;
  *) echo '{{"type":"result","status":"success"}}' ;;
esac"#,
                calls = calls.display()
            ),
        );
        let outcome = agent(program, Box::new(Gemini), temp.path())
            .invoke(&request(temp.path()))
            .expect("invoke");
        assert!(outcome.succeeded);
        let calls = fs::read_to_string(&calls).expect("calls");
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("-m m-pro"));
        assert!(lines[1].ends_with("-m m-flash"));
        assert!(lines[0].contains("--allowed-tools read_file"));
    }

    #[test]
    fn non_retryable_failure_stops_immediately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let calls = temp.path().join("calls");
        let program = script(
            temp.path(),
            "gemini",
            &format!("echo x >> {}\necho 'quota exceeded' >&2\nexit 1", calls.display()),
        );
        let outcome = agent(program, Box::new(Gemini), temp.path())
            .invoke(&request(temp.path()))
            .expect("invoke");
        assert!(!outcome.succeeded);
        assert_eq!(fs::read_to_string(&calls).expect("calls").lines().count(), 1);
    }

    #[test]
    fn claude_never_retries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let calls = temp.path().join("calls");
        let program = script(
            temp.path(),
            "claude",
            &format!("echo x >> {}\necho 'model not found' >&2\nexit 1", calls.display()),
        );
        let outcome = agent(program, Box::new(Claude), temp.path())
            .invoke(&request(temp.path()))
            .expect("invoke");
        assert!(!outcome.succeeded);
        assert_eq!(fs::read_to_string(&calls).expect("calls").lines().count(), 1);
    }
}
