//! Provider capability interface and the normalized event model.

use std::path::Path;
use std::process::Command;

use serde_json::Value;

/// Provider-neutral view of one stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Session established (init event).
    Session(String),
    /// Assistant text.
    Message(String),
    ToolStarted {
        name: String,
        /// Most telling argument (command, path, pattern), unabridged.
        summary: String,
    },
    ToolCompleted {
        is_error: bool,
    },
    /// Terminal result event.
    Finished {
        session_id: Option<String>,
        cost_usd: Option<f64>,
        duration_ms: Option<u64>,
        is_error: bool,
    },
    /// Valid JSON the provider does not interpret.
    Other,
}

/// Everything the runner needs to know about one agent CLI.
pub trait AgentProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Build the command for one attempt. The caller sets cwd and stdio.
    fn command(
        &self,
        program: &Path,
        prompt: &str,
        tools: &[String],
        model: Option<&str>,
    ) -> Command;

    /// Translate a canonical tool name (`Read`, `Write`, `Edit`, `Bash`, `Grep`).
    fn tool_name(&self, canonical: &str) -> String;

    /// Interpret one JSON line. May yield several events (e.g. multiple tool calls).
    fn parse_event(&self, value: Value) -> Vec<AgentEvent>;

    /// Whether `fallback_models` apply to this provider.
    fn supports_fallback(&self) -> bool {
        false
    }

    fn map_tools(&self, tools: &[String]) -> Vec<String> {
        tools.iter().map(|t| self.tool_name(t)).collect()
    }
}

const SUMMARY_KEYS: [&str; 7] = [
    "command",
    "file_path",
    "absolute_path",
    "path",
    "pattern",
    "url",
    "query",
];

/// Pick the most telling argument out of a tool's input object.
pub(crate) fn summarize_input(input: &Value) -> String {
    if let Some(obj) = input.as_object() {
        for key in SUMMARY_KEYS {
            if let Some(text) = obj.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
        if obj.is_empty() {
            return String::new();
        }
    }
    match input {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human-readable progress line for an event, or None when it is not worth printing.
pub fn progress_line(event: &AgentEvent, width: usize) -> Option<String> {
    match event {
        AgentEvent::ToolStarted { name, summary } => {
            let summary = truncate(&summary.replace('\n', " "), width);
            if summary.is_empty() {
                Some(format!("  > {name}"))
            } else {
                Some(format!("  > {name}: {summary}"))
            }
        }
        AgentEvent::ToolCompleted { is_error: true } => Some("    tool reported an error".to_string()),
        AgentEvent::Finished {
            cost_usd,
            duration_ms,
            is_error,
            ..
        } => {
            let mut line = if *is_error {
                "  agent finished with an error".to_string()
            } else {
                "  agent finished".to_string()
            };
            if let Some(ms) = duration_ms {
                line.push_str(&format!(" in {:.1}s", *ms as f64 / 1000.0));
            }
            if let Some(cost) = cost_usd {
                line.push_str(&format!(" (${cost:.4})"));
            }
            Some(line)
        }
        AgentEvent::Session(_)
        | AgentEvent::Message(_)
        | AgentEvent::ToolCompleted { is_error: false }
        | AgentEvent::Other => None,
    }
}

/// Truncate to `width` characters, marking the cut with `...`.
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let keep = width.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
