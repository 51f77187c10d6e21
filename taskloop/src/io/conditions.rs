//! Evaluate completion conditions against a working directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::core::condition::Condition;
use crate::io::process::run_shell;

/// Placeholder in condition paths that matches any `dddd-dd-dd` date.
pub const DATE_PLACEHOLDER: &str = "YYYY-MM-DD";

/// Where and how conditions are evaluated.
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Root for relative paths and the working directory for `command(...)`.
    pub workdir: PathBuf,
    /// The orchestrator's own instruction document.
    pub instructions: PathBuf,
    pub command_timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Outcome of one condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionResult {
    pub expr: String,
    pub passed: bool,
    /// Command output or parse error, kept for diagnostics only.
    pub detail: Option<String>,
}

/// How an item's Done list resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every condition holds.
    Met,
    /// At least one condition fails.
    Unmet,
    /// The list contains `always`: the item recurs and never completes.
    Recurring,
    /// No conditions declared: the item can never auto-complete.
    Undeclared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoneReport {
    pub completion: Completion,
    pub results: Vec<ConditionResult>,
}

impl DoneReport {
    pub fn is_done(&self) -> bool {
        self.completion == Completion::Met
    }

    /// One line per condition: `[pass] expr` / `[FAIL] expr`.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        match self.completion {
            Completion::Undeclared => lines.push("(no Done conditions declared)".to_string()),
            Completion::Recurring => lines.push("(recurring: contains `always`)".to_string()),
            Completion::Met | Completion::Unmet => {}
        }
        for result in &self.results {
            let mark = if result.passed { "pass" } else { "FAIL" };
            lines.push(format!("[{mark}] {}", result.expr));
            if !result.passed
                && let Some(detail) = result.detail.as_deref().map(str::trim)
                && !detail.is_empty()
            {
                for line in detail.lines().take(10) {
                    lines.push(format!("       {line}"));
                }
            }
        }
        lines.join("\n")
    }
}

/// Evaluate one expression string. Unparseable input fails closed with one warning.
pub fn check(expr: &str, ctx: &EvalContext) -> bool {
    evaluate_expr(expr, ctx).passed
}

/// Evaluate an item's Done list (logical AND; empty is never done).
pub fn check_done(conditions: &[String], ctx: &EvalContext) -> DoneReport {
    if conditions.is_empty() {
        info!(workdir = %ctx.workdir.display(), "no Done conditions declared");
        return DoneReport {
            completion: Completion::Undeclared,
            results: Vec::new(),
        };
    }

    let mut recurring = false;
    let mut results = Vec::with_capacity(conditions.len());
    for expr in conditions {
        if matches!(Condition::parse(expr), Ok(Condition::Always)) {
            recurring = true;
        }
        results.push(evaluate_expr(expr, ctx));
    }

    let completion = if recurring {
        debug!("Done list contains always, item recurs");
        Completion::Recurring
    } else if results.iter().all(|r| r.passed) {
        Completion::Met
    } else {
        Completion::Unmet
    };
    DoneReport {
        completion,
        results,
    }
}

fn evaluate_expr(expr: &str, ctx: &EvalContext) -> ConditionResult {
    match Condition::parse(expr) {
        Ok(cond) => {
            let (passed, detail) = evaluate(&cond, ctx);
            debug!(expr, passed, "condition evaluated");
            ConditionResult {
                expr: expr.to_string(),
                passed,
                detail,
            }
        }
        Err(err) => {
            warn!(expr, %err, "unrecognized condition, treating as failed");
            ConditionResult {
                expr: expr.to_string(),
                passed: false,
                detail: Some(err.to_string()),
            }
        }
    }
}

/// Evaluate a parsed condition, returning (passed, diagnostic detail).
pub fn evaluate(cond: &Condition, ctx: &EvalContext) -> (bool, Option<String>) {
    match cond {
        Condition::FileExists { path } => (path_exists(&ctx.workdir, path), None),
        Condition::FileAbsent { path } => (!path_exists(&ctx.workdir, path), None),
        Condition::FileContains { path, text } => {
            (any_file_contains(&ctx.workdir, path, text), None)
        }
        Condition::FileMissingText { path, text } => {
            (!any_file_contains(&ctx.workdir, path, text), None)
        }
        Condition::Command { expr } => {
            match run_shell(
                expr,
                &ctx.workdir,
                ctx.command_timeout,
                ctx.output_limit_bytes,
            ) {
                Ok(out) => (out.success(), Some(out.combined())),
                Err(err) => (false, Some(format!("{err:#}"))),
            }
        }
        Condition::SectionExists { text } => (instructions_contain(ctx, text), None),
        Condition::NoSection { text } => (!instructions_contain(ctx, text), None),
        Condition::Always => (false, None),
    }
}

fn instructions_contain(ctx: &EvalContext, text: &str) -> bool {
    fs::read_to_string(&ctx.instructions)
        .map(|contents| contents.contains(text))
        .unwrap_or(false)
}

fn path_exists(root: &Path, pattern: &str) -> bool {
    !matching_paths(root, pattern).is_empty()
}

fn any_file_contains(root: &Path, pattern: &str, text: &str) -> bool {
    matching_paths(root, pattern).iter().any(|path| {
        fs::read_to_string(path)
            .map(|contents| contents.contains(text))
            .unwrap_or(false)
    })
}

/// Resolve a root-relative path that may contain `YYYY-MM-DD` or `*` wildcards.
pub fn matching_paths(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let pattern = pattern.trim_start_matches("./");
    if !is_wildcard(pattern) {
        let path = root.join(pattern);
        return if path.exists() { vec![path] } else { Vec::new() };
    }

    let mut candidates = vec![root.to_path_buf()];
    for component in pattern.split('/').filter(|c| !c.is_empty() && *c != ".") {
        let mut next = Vec::new();
        if is_wildcard(component) {
            let Some(re) = component_regex(component) else {
                return Vec::new();
            };
            for dir in &candidates {
                let Ok(entries) = fs::read_dir(dir) else {
                    continue;
                };
                let mut matched: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok())
                    .filter(|e| re.is_match(&e.file_name().to_string_lossy()))
                    .map(|e| e.path())
                    .collect();
                matched.sort();
                next.extend(matched);
            }
        } else {
            next.extend(
                candidates
                    .iter()
                    .map(|dir| dir.join(component))
                    .filter(|p| p.exists()),
            );
        }
        if next.is_empty() {
            return next;
        }
        candidates = next;
    }
    candidates
}

fn is_wildcard(s: &str) -> bool {
    s.contains(DATE_PLACEHOLDER) || s.contains('*')
}

fn component_regex(component: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for (i, date_part) in component.split(DATE_PLACEHOLDER).enumerate() {
        if i > 0 {
            re.push_str(r"\d{4}-\d{2}-\d{2}");
        }
        let escaped: Vec<String> = date_part.split('*').map(regex::escape).collect();
        re.push_str(&escaped.join(".*"));
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    /// Counts WARN events emitted while installed.
    #[derive(Clone, Default)]
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn warnings_during<T>(f: impl FnOnce() -> T) -> (T, usize) {
        let counter = WarnCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, counter.0.load(Ordering::SeqCst))
    }

    fn ctx(root: &Path) -> EvalContext {
        EvalContext {
            workdir: root.to_path_buf(),
            instructions: root.join("LOOP.md"),
            command_timeout: Duration::from_secs(10),
            output_limit_bytes: 1000,
        }
    }

    #[test]
    fn file_existence_checks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());
        assert!(!check(r#"file_exists("README.md")"#, &c));
        assert!(check(r#"file_absent("README.md")"#, &c));
        fs::write(temp.path().join("README.md"), "hi").expect("write");
        assert!(check(r#"file_exists("README.md")"#, &c));
        assert!(!check(r#"file_absent("README.md")"#, &c));
    }

    #[test]
    fn date_placeholder_matches_dated_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());
        fs::create_dir_all(temp.path().join("notes")).expect("mkdir");
        assert!(!check(r#"file_exists("notes/YYYY-MM-DD-summary.md")"#, &c));
        fs::write(temp.path().join("notes/2025-01-31-summary.md"), "x").expect("write");
        fs::write(temp.path().join("notes/draft-summary.md"), "x").expect("write");
        assert!(check(r#"file_exists("notes/YYYY-MM-DD-summary.md")"#, &c));
        assert!(check(r#"file_exists("notes/*.md")"#, &c));
        assert!(!check(r#"file_exists("notes/YYYY-MM-DD-other.md")"#, &c));
    }

    #[test]
    fn contains_and_missing_text_are_complements() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());
        fs::write(temp.path().join("a.txt"), "alpha beta").expect("write");
        for text in ["alpha", "gamma"] {
            let contains = check(&format!(r#"file_contains("a.txt", "{text}")"#), &c);
            let missing = check(&format!(r#"file_missing_text("a.txt", "{text}")"#), &c);
            assert_ne!(contains, missing, "text {text}");
        }
        assert!(!check(r#"file_contains("nope.txt", "alpha")"#, &c));
        assert!(check(r#"file_missing_text("nope.txt", "alpha")"#, &c));
    }

    #[test]
    fn command_uses_exit_status_and_keeps_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());
        assert!(check(r#"command("true")"#, &c));
        let report = check_done(&[r#"command("echo nope; exit 1")"#.to_string()], &c);
        assert_eq!(report.completion, Completion::Unmet);
        assert!(
            report.results[0]
                .detail
                .as_deref()
                .unwrap_or_default()
                .contains("nope")
        );
        assert!(report.render().contains("[FAIL] command"));
    }

    #[test]
    fn section_checks_read_the_instruction_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());
        assert!(!check(r###"section_exists("## Deploy")"###, &c));
        assert!(check(r###"no_section("## Deploy")"###, &c));
        fs::write(temp.path().join("LOOP.md"), "# Loop\n\n## Deploy\n").expect("write");
        assert!(check(r###"section_exists("## Deploy")"###, &c));
        assert!(!check(r###"no_section("## Deploy")"###, &c));
    }

    #[test]
    fn unrecognized_expressions_fail_closed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());
        assert!(!check("file_exists(README.md)", &c));
        assert!(!check("looks_good()", &c));
        let report = check_done(&["whatever".to_string()], &c);
        assert_eq!(report.completion, Completion::Unmet);
        assert!(report.results[0].detail.is_some());
    }

    #[test]
    fn empty_and_always_lists_never_complete() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());
        assert_eq!(check_done(&[], &c).completion, Completion::Undeclared);
        let report = check_done(&["always".to_string(), r#"command("true")"#.to_string()], &c);
        assert_eq!(report.completion, Completion::Recurring);
        assert!(!report.is_done());
    }

    #[test]
    fn all_conditions_must_hold() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());
        fs::write(temp.path().join("README.md"), "Usage").expect("write");
        let conditions = vec![
            r#"file_exists("README.md")"#.to_string(),
            r#"file_contains("README.md", "Usage")"#.to_string(),
        ];
        assert!(check_done(&conditions, &c).is_done());
    }

    #[test]
    fn unknown_expression_warns_once_and_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let c = ctx(temp.path());

        let (passed, warnings) = warnings_during(|| check("frobnicate(1)", &c));
        assert!(!passed);
        assert_eq!(warnings, 1);

        let (report, warnings) =
            warnings_during(|| check_done(&["frobnicate(1)".to_string()], &c));
        assert_eq!(report.completion, Completion::Unmet);
        assert!(report.results[0].detail.is_some());
        assert_eq!(warnings, 1);
    }
}
