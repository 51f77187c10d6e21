//! Personas: instruction text prepended to an agent prompt, optionally with their own tools.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::task::{parse_header, parse_list, reference_stem, split_header};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    pub instructions: String,
    /// Overrides the item's allowlist when declared.
    pub tools: Option<Vec<String>>,
}

impl Persona {
    /// Parse a persona file. The `---` header is optional; only `tools` is read from it.
    pub fn parse(name: &str, contents: &str) -> Result<Self> {
        let (tools, body) = if contents.starts_with("---") {
            let (header, body) = split_header(contents)
                .ok_or_else(|| anyhow!("persona '{name}' has an unterminated header"))?;
            let header = parse_header(header)?;
            (header.get("tools").map(parse_list), body)
        } else {
            (None, contents)
        };
        Ok(Self {
            name: name.to_string(),
            instructions: body.trim().to_string(),
            tools: tools.filter(|t| !t.is_empty()),
        })
    }
}

/// Load `<agents_dir>/<reference>.md`.
pub fn load_persona(agents_dir: &Path, reference: &str) -> Result<Persona> {
    let name = reference_stem(reference);
    let path = agents_dir.join(format!("{name}.md"));
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("read persona {}", path.display()))?;
    Persona::parse(name, &contents).with_context(|| format!("parse persona {}", path.display()))
}
