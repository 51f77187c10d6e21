//! `claude -p ... --output-format stream-json` provider.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use serde_json::Value;

use crate::agent::provider::{AgentEvent, AgentProvider, summarize_input};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClaudeEvent {
    #[serde(rename = "system")]
    System(SystemEvent),
    #[serde(rename = "assistant")]
    Assistant(MessageEvent),
    #[serde(rename = "user")]
    User(MessageEvent),
    #[serde(rename = "result")]
    Result(ResultEvent),
}

#[derive(Debug, Deserialize)]
struct SystemEvent {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ResultEvent {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    is_error: bool,
}

pub struct Claude;

impl AgentProvider for Claude {
    fn name(&self) -> &'static str {
        "claude"
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
            .arg("--verbose")
            .arg("--allowedTools")
            .arg(tools.join(","));
        if let Some(model) = model {
            cmd.arg("--model").arg(model);
        }
        cmd
    }

    fn tool_name(&self, canonical: &str) -> String {
        canonical.to_string()
    }

    fn parse_event(&self, value: Value) -> Vec<AgentEvent> {
        let Ok(event) = serde_json::from_value::<ClaudeEvent>(value) else {
            return vec![AgentEvent::Other];
        };
        match event {
            ClaudeEvent::System(sys) => match (sys.subtype.as_deref(), sys.session_id) {
                (Some("init"), Some(id)) => vec![AgentEvent::Session(id)],
                _ => vec![AgentEvent::Other],
            },
            ClaudeEvent::Assistant(msg) | ClaudeEvent::User(msg) => msg
                .message
                .content
                .into_iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => AgentEvent::Message(text),
                    ContentBlock::ToolUse { name, input } => AgentEvent::ToolStarted {
                        summary: summarize_input(&input),
                        name,
                    },
                    ContentBlock::ToolResult { is_error } => AgentEvent::ToolCompleted {
                        is_error: is_error.unwrap_or(false),
                    },
                    ContentBlock::Unknown => AgentEvent::Other,
                })
                .collect(),
            ClaudeEvent::Result(res) => vec![AgentEvent::Finished {
                session_id: res.session_id,
                cost_usd: res.total_cost_usd,
                duration_ms: res.duration_ms,
                is_error: res.is_error,
            }],
        }
    }
}
