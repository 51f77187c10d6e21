//! Resolve the agent CLI from the configured search order.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, info};

use crate::agent::claude::Claude;
use crate::agent::gemini::Gemini;
use crate::agent::provider::AgentProvider;

/// A provider together with the executable that speaks its protocol.
pub struct Detected {
    pub program: PathBuf,
    pub provider: Box<dyn AgentProvider>,
}

/// First entry of `candidates` that resolves to an executable wins.
///
/// Entries are bare command names looked up on `PATH`, or paths. The stream
/// shape follows the executable's file name: `gemini*` speaks the Gemini
/// protocol, anything else the Claude one.
pub fn detect(candidates: &[String]) -> Result<Detected> {
    for candidate in candidates {
        let Some(program) = resolve_command(candidate) else {
            debug!(candidate = %candidate, "agent command not found");
            continue;
        };
        let provider = provider_for(&program);
        info!(program = %program.display(), provider = provider.name(), "agent command resolved");
        return Ok(Detected { program, provider });
    }
    Err(anyhow!(
        "no agent command found on PATH (tried: {})",
        candidates.join(", ")
    ))
}

fn provider_for(program: &Path) -> Box<dyn AgentProvider> {
    let base = program
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if base.starts_with("gemini") {
        Box::new(Gemini)
    } else {
        Box::new(Claude)
    }
}

fn resolve_command(cmd: &str) -> Option<PathBuf> {
    let trimmed = cmd.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains('/') || trimmed.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(trimmed);
        return is_executable(&path).then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    let dirs: Vec<PathBuf> = std::env::split_paths(&path_var).collect();
    find_executable_in_dirs(trimmed, &dirs)
}

pub(crate) fn find_executable_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && (m.permissions().mode() & 0o111 != 0))
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").expect("write");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        }
        path
    }

    #[test]
    fn finds_first_executable_in_dirs() {
        let a = tempfile::tempdir().expect("tempdir");
        let b = tempfile::tempdir().expect("tempdir");
        fs::write(a.path().join("claude"), "not executable").expect("write");
        let expected = write_executable(b.path(), "claude");
        let dirs = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        #[cfg(unix)]
        assert_eq!(find_executable_in_dirs("claude", &dirs), Some(expected));
        #[cfg(not(unix))]
        let _ = expected;
        assert_eq!(find_executable_in_dirs("gemini", &dirs), None);
    }

    #[test]
    fn search_order_and_provider_shape() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gemini = write_executable(temp.path(), "gemini-cli");
        let candidates = vec![
            temp.path().join("missing").to_string_lossy().to_string(),
            gemini.to_string_lossy().to_string(),
        ];
        let detected = detect(&candidates).expect("detect");
        assert_eq!(detected.program, gemini);
        assert_eq!(detected.provider.name(), "gemini");

        let fake = write_executable(temp.path(), "fake-agent");
        let detected = detect(&[fake.to_string_lossy().to_string()]).expect("detect");
        assert_eq!(detected.provider.name(), "claude");
    }

    #[test]
    fn nothing_found_is_an_error() {
        let err = detect(&["/nonexistent/agent".to_string()])
            .err()
            .expect("no agent");
        assert!(err.to_string().contains("/nonexistent/agent"));
    }
}
