//! Orchestrator configuration stored in `taskloop.toml` at the repository root.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "taskloop.toml";

/// Loop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values in [`LoopConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Directory of work-item files, relative to the root.
    pub tasks_dir: String,
    /// Directory of persona files referenced by a task's `agent` field.
    pub agents_dir: String,
    /// The orchestrator's own instruction document (`section_exists`/`no_section`).
    pub instructions_file: String,
    /// Prompt text handed to the planner when nothing is runnable.
    pub planner_prompt_file: String,
    /// Runtime state (lock, run log, workspaces). Git-ignored.
    pub state_dir: String,
    /// Namespace for per-record workspace branches.
    pub branch_prefix: String,
    /// Tool allowlist for items that do not declare `tools`.
    pub default_tools: Vec<String>,
    /// Sleep after a planner pass that left nothing runnable.
    pub idle_sleep_secs: u64,
    /// Stop after this many loop iterations (0 = unbounded).
    pub max_iterations: u32,
    /// Wall-clock limit for each `command(...)` condition.
    pub condition_timeout_secs: u64,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Provider commands looked up on `PATH`, first found wins.
    pub providers: Vec<String>,
    /// Print a "still working" line after this long without an event.
    pub heartbeat_secs: u64,
    /// Absolute limit per invocation (0 = none).
    pub timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL when terminating an agent.
    pub grace_secs: u64,
    /// Truncate tool arguments in progress lines to this many characters.
    pub progress_width: usize,
    /// Models tried in order by providers that support fallback.
    pub fallback_models: Vec<String>,
    /// Stderr substrings that mark a model-unavailable (retryable) failure.
    pub retryable_errors: Vec<String>,
    /// Bound on captured stderr / unparsed stdout kept for diagnostics.
    pub diagnostic_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            providers: vec!["claude".to_string(), "gemini".to_string()],
            heartbeat_secs: 120,
            timeout_secs: 0,
            grace_secs: 5,
            progress_width: 100,
            fallback_models: vec![
                "gemini-2.5-pro".to_string(),
                "gemini-2.5-flash".to_string(),
            ],
            retryable_errors: vec![
                "model not found".to_string(),
                "ModelNotFound".to_string(),
                "unknown model".to_string(),
                "is not available".to_string(),
                "not supported for".to_string(),
            ],
            diagnostic_limit_bytes: 8_000,
        }
    }
}

impl AgentConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tasks_dir: "tasks".to_string(),
            agents_dir: "agents".to_string(),
            instructions_file: "LOOP.md".to_string(),
            planner_prompt_file: "PLAN.md".to_string(),
            state_dir: ".taskloop".to_string(),
            branch_prefix: "taskloop/".to_string(),
            default_tools: ["Read", "Write", "Edit", "Bash", "Grep"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            idle_sleep_secs: 30,
            max_iterations: 0,
            condition_timeout_secs: 300,
            agent: AgentConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("tasks_dir", &self.tasks_dir),
            ("agents_dir", &self.agents_dir),
            ("state_dir", &self.state_dir),
            ("branch_prefix", &self.branch_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{key} must not be empty"));
            }
        }
        if self.default_tools.is_empty() {
            return Err(anyhow!("default_tools must list at least one tool"));
        }
        if self.condition_timeout_secs == 0 {
            return Err(anyhow!("condition_timeout_secs must be > 0"));
        }
        if self.agent.providers.iter().all(|p| p.trim().is_empty()) {
            return Err(anyhow!("agent.providers must name at least one command"));
        }
        if self.agent.heartbeat_secs == 0 {
            return Err(anyhow!("agent.heartbeat_secs must be > 0"));
        }
        if self.agent.diagnostic_limit_bytes == 0 {
            return Err(anyhow!("agent.diagnostic_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn condition_timeout(&self) -> Duration {
        Duration::from_secs(self.condition_timeout_secs)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_secs(self.idle_sleep_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
        assert_eq!(cfg.agent.timeout(), None);
    }

    #[test]
    fn serialized_config_loads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        let mut cfg = LoopConfig::default();
        cfg.agent.timeout_secs = 5;
        fs::write(&path, toml::to_string_pretty(&cfg).expect("serialize")).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.agent.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "tasks_dir = \"queue\"\n[agent]\nheartbeat_secs = 7\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.tasks_dir, "queue");
        assert_eq!(cfg.agent.heartbeat_secs, 7);
        assert_eq!(cfg.agent.providers, AgentConfig::default().providers);
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[agent]\nheartbeat_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("heartbeat_secs"));
    }
}
