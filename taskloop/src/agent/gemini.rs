//! `gemini -p ... --output-format stream-json` provider. Supports model fallback.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use serde_json::Value;

use crate::agent::provider::{AgentEvent, AgentProvider, summarize_input};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GeminiEvent {
    Init {
        #[serde(default)]
        session_id: Option<String>,
    },
    Message {
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        content: String,
    },
    ToolUse {
        tool_name: String,
        #[serde(default)]
        parameters: Value,
    },
    ToolResult {
        #[serde(default)]
        status: Option<String>,
    },
    Result {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        stats: Option<Stats>,
    },
}

#[derive(Debug, Deserialize)]
struct Stats {
    #[serde(default)]
    duration_ms: Option<u64>,
}

pub struct Gemini;

impl AgentProvider for Gemini {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn command(
        &self,
        program: &Path,
        prompt: &str,
        tools: &[String],
        model: Option<&str>,
    ) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--allowed-tools")
            .arg(tools.join(","));
        if let Some(model) = model {
            cmd.arg("-m").arg(model);
        }
        cmd
    }

    fn tool_name(&self, canonical: &str) -> String {
        match canonical {
            "Read" => "read_file",
            "Write" => "write_file",
            "Edit" => "replace",
            "Bash" => "run_shell_command",
            "Grep" => "search_file_content",
            other => other,
        }
        .to_string()
    }

    fn parse_event(&self, value: Value) -> Vec<AgentEvent> {
        let Ok(event) = serde_json::from_value::<GeminiEvent>(value) else {
            return vec![AgentEvent::Other];
        };
        let event = match event {
            GeminiEvent::Init {
                session_id: Some(id),
            } => AgentEvent::Session(id),
            GeminiEvent::Init { session_id: None } => AgentEvent::Other,
            GeminiEvent::Message { role, content } if role.as_deref() != Some("user") => {
                AgentEvent::Message(content)
            }
            GeminiEvent::Message { .. } => AgentEvent::Other,
            GeminiEvent::ToolUse {
                tool_name,
                parameters,
            } => AgentEvent::ToolStarted {
                summary: summarize_input(&parameters),
                name: tool_name,
            },
            GeminiEvent::ToolResult { status } => AgentEvent::ToolCompleted {
                is_error: status.as_deref().is_some_and(|s| s != "success"),
            },
            GeminiEvent::Result { status, stats } => AgentEvent::Finished {
                session_id: None,
                cost_usd: None,
                duration_ms: stats.and_then(|s| s.duration_ms),
                is_error: status.as_deref() == Some("error"),
            },
        };
        vec![event]
    }

    fn supports_fallback(&self) -> bool {
        true
    }
}
