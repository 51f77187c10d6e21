//! Agent invocation: providers, the streaming coordinator, and the CLI-backed runner.
//!
//! The [`AgentRunner`] trait decouples scheduling from the agent backend.
//! Tests use a scripted runner that records requests without spawning anything.

pub mod claude;
pub mod cli;
pub mod detect;
pub mod gemini;
pub mod provider;
pub mod run_log;
pub mod stream;

use std::path::PathBuf;

use anyhow::Result;

use crate::io::persona::Persona;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Work item (or planner) name, recorded in the run log marker.
    pub label: String,
    pub prompt: String,
    /// Canonical tool names (`Read`, `Write`, `Edit`, `Bash`, `Grep`).
    pub tools: Vec<String>,
    pub persona: Option<Persona>,
    pub workdir: PathBuf,
}

impl InvokeRequest {
    /// Prompt with persona instructions prepended.
    pub fn effective_prompt(&self) -> String {
        match self
            .persona
            .as_ref()
            .map(|p| p.instructions.trim())
            .filter(|s| !s.is_empty())
        {
            Some(persona) => format!("{persona}\n\n---\n\n{}", self.prompt),
            None => self.prompt.clone(),
        }
    }

    /// Persona tools win over the item's allowlist.
    pub fn effective_tools(&self) -> &[String] {
        match self.persona.as_ref().and_then(|p| p.tools.as_deref()) {
            Some(tools) => tools,
            None => &self.tools,
        }
    }
}

/// Result of an invocation. A failed run is `Ok` with `succeeded == false`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeOutcome {
    pub succeeded: bool,
    pub session_id: Option<String>,
}

/// Abstraction over agent execution backends.
pub trait AgentRunner {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(persona: Option<Persona>) -> InvokeRequest {
        InvokeRequest {
            label: "t".to_string(),
            prompt: "Do it.".to_string(),
            tools: vec!["Read".to_string(), "Write".to_string()],
            persona,
            workdir: PathBuf::from("."),
        }
    }

    #[test]
    fn without_persona_request_passes_through() {
        let req = request(None);
        assert_eq!(req.effective_prompt(), "Do it.");
        assert_eq!(req.effective_tools(), ["Read".to_string(), "Write".to_string()]);
    }

    #[test]
    fn persona_prepends_text_and_overrides_tools() {
        let req = request(Some(Persona {
            name: "reviewer".to_string(),
            instructions: "Review only.".to_string(),
            tools: Some(vec!["Read".to_string()]),
        }));
        assert_eq!(req.effective_prompt(), "Review only.\n\n---\n\nDo it.");
        assert_eq!(req.effective_tools(), ["Read".to_string()]);
    }
}
