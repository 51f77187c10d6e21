//! Real-subprocess tests: the CLI-backed runner against `sh` stand-ins for an agent.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use taskloop::agent::claude::Claude;
use taskloop::agent::cli::CliAgent;
use taskloop::agent::detect::Detected;
use taskloop::core::task::Status;
use taskloop::io::config::AgentConfig;
use taskloop::looping::{LoopOptions, LoopStop, run_loop};
use taskloop::test_support::TestRepo;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    }
    path
}

fn claude_agent(program: PathBuf, config: &AgentConfig, repo: &TestRepo) -> CliAgent {
    let ctx = repo.context();
    CliAgent::with_detected(
        Detected {
            program,
            provider: Box::new(Claude),
        },
        config,
        ctx.run_log_path(),
        ctx.interrupt.clone(),
    )
}

#[test]
fn hung_agent_is_terminated_and_item_stopped() {
    let repo = TestRepo::new().expect("repo");
    let bin = tempfile::tempdir().expect("bin");
    repo.write_task("2025-01-01-hang", "title: Hang", "Wait.\n\n## Done\n- always\n")
        .expect("task");
    let program = script(
        bin.path(),
        "claude",
        r#"echo '{"type":"system","subtype":"init","session_id":"s-hang"}'
sleep 60"#,
    );
    let config = AgentConfig {
        timeout_secs: 2,
        grace_secs: 1,
        ..AgentConfig::default()
    };
    let agent = claude_agent(program, &config, &repo);
    let ctx = repo.context();

    let started = Instant::now();
    let outcome = run_loop(&ctx, &agent, LoopOptions::default(), |_| {}).expect("loop");
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(
        outcome.stop,
        LoopStop::Failed {
            task: "2025-01-01-hang".to_string()
        }
    );

    let task = ctx.store().load("2025-01-01-hang").expect("load");
    assert_eq!(task.status, Some(Status::Stopped));
    assert_eq!(task.stop_reason.as_deref(), Some("failed"));
    assert_eq!(task.session.as_deref(), Some("s-hang"));

    let log = fs::read_to_string(ctx.run_log_path()).expect("run log");
    assert!(log.starts_with("=== 2025-01-01-hang started"));
    assert!(log.contains("s-hang"));
}

#[test]
fn streaming_agent_completes_item_with_session() {
    let repo = TestRepo::new().expect("repo");
    let bin = tempfile::tempdir().expect("bin");
    repo.write_task(
        "2025-01-01-hello",
        "title: Hello\ntools: Read, Write",
        "Say hello.\n\n## Done\n- file_exists(\"hello.txt\")\n",
    )
    .expect("task");
    let args = bin.path().join("args");
    let program = script(
        bin.path(),
        "claude",
        &format!(
            r#"echo "$*" > {args}
echo hello > hello.txt
echo '{{"type":"system","subtype":"init","session_id":"s-7"}}'
echo 'not json at all'
echo '{{"type":"result","session_id":"s-7","is_error":false}}'"#,
            args = args.display()
        ),
    );
    let agent = claude_agent(program, &AgentConfig::default(), &repo);
    let ctx = repo.context();

    let outcome = run_loop(&ctx, &agent, LoopOptions { once: true }, |_| {}).expect("loop");
    assert_eq!(outcome.stop, LoopStop::Once);

    let task = ctx.store().load("2025-01-01-hello").expect("load");
    assert_eq!(task.status, Some(Status::Completed));
    assert_eq!(task.session.as_deref(), Some("s-7"));
    let args = fs::read_to_string(&args).expect("args");
    assert!(args.contains("--allowedTools Read,Write"));
    assert!(args.contains("--output-format stream-json"));
}
