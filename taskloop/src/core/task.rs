//! Work-item records: header fields, body sections, and in-place header edits.
//!
//! A record is a UTF-8 document with a `---` delimited header of `key: value`
//! lines followed by free-form body text. Everything here is pure string
//! manipulation; reading and writing files lives in `io::task_store`.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

const DELIMITER: &str = "---";

/// Lifecycle state of a work item (and of higher-level records).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Backlog,
    Active,
    Suspended,
    Completed,
    Stopped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Backlog => "backlog",
            Status::Active => "active",
            Status::Suspended => "suspended",
            Status::Completed => "completed",
            Status::Stopped => "stopped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "backlog" => Some(Status::Backlog),
            "active" => Some(Status::Active),
            "suspended" => Some(Status::Suspended),
            "completed" => Some(Status::Completed),
            "stopped" => Some(Status::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `## <Heading>` block in the body. `key` is the lowercased heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub key: String,
    pub heading: String,
    pub content: String,
}

/// Body text split into the instruction prefix and named sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub instruction: String,
    pub sections: Vec<Section>,
}

impl Body {
    pub fn parse(text: &str) -> Self {
        let mut instruction = Vec::new();
        let mut sections: Vec<Section> = Vec::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for line in text.lines() {
            if let Some(heading) = line.strip_prefix("## ") {
                if let Some((heading, lines)) = current.take() {
                    sections.push(make_section(heading, &lines));
                }
                current = Some((heading.trim().to_string(), Vec::new()));
                continue;
            }
            match current.as_mut() {
                Some((_, lines)) => lines.push(line),
                None => instruction.push(line),
            }
        }
        if let Some((heading, lines)) = current.take() {
            sections.push(make_section(heading, &lines));
        }

        Self {
            instruction: instruction.join("\n").trim().to_string(),
            sections,
        }
    }

    /// Look up a section by heading, case-insensitively.
    pub fn section(&self, heading: &str) -> Option<&str> {
        let key = heading.to_ascii_lowercase();
        self.sections
            .iter()
            .find(|s| s.key == key)
            .map(|s| s.content.as_str())
    }

    /// Condition expressions listed under `## Done`, with bullets and backticks stripped.
    pub fn done_conditions(&self) -> Vec<String> {
        let Some(done) = self.section("done") else {
            return Vec::new();
        };
        done.lines().filter_map(strip_condition_line).collect()
    }
}

fn make_section(heading: String, lines: &[&str]) -> Section {
    Section {
        key: heading.to_ascii_lowercase(),
        heading,
        content: lines.join("\n").trim().to_string(),
    }
}

fn strip_condition_line(line: &str) -> Option<String> {
    let mut s = line.trim();
    if s.is_empty() || s.starts_with("<!--") {
        return None;
    }
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = s.strip_prefix(bullet) {
            s = rest.trim();
            break;
        }
    }
    if s.len() >= 2 && s.starts_with('`') && s.ends_with('`') {
        s = s[1..s.len() - 1].trim();
    }
    (!s.is_empty()).then(|| s.to_string())
}

/// Header fields as ordered `(key, value)` pairs, exactly as they appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub fields: Vec<(String, String)>,
}

impl Header {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// A parsed work item. `name` is the file stem (date-prefixed, sortable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub title: String,
    pub parent: Option<String>,
    pub previous: Option<String>,
    pub agent: Option<String>,
    pub tools: Option<Vec<String>>,
    pub status: Option<Status>,
    pub stop_reason: Option<String>,
    pub pid: Option<u32>,
    pub session: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub header: Header,
    pub body: Body,
}

impl Task {
    /// Parse a record. Fails only when the header delimiters are missing or a
    /// header line is not a `key: value` pair.
    pub fn parse(name: &str, contents: &str) -> Result<Self> {
        let (header_text, body_text) = split_header(contents)
            .ok_or_else(|| anyhow!("missing '{DELIMITER}' header delimiters"))?;
        let header = parse_header(header_text)?;

        let status = match header.get("status") {
            Some(raw) => {
                Some(Status::parse(raw).ok_or_else(|| anyhow!("unknown status '{raw}'"))?)
            }
            None => None,
        };
        let pid = match header.get("pid") {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .map_err(|_| anyhow!("pid must be a process id (got '{raw}')"))?,
            ),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            title: header
                .get("title")
                .map(str::to_string)
                .unwrap_or_else(|| display_name(name)),
            parent: header.get("parent").map(str::to_string),
            previous: header.get("previous").map(str::to_string),
            agent: header.get("agent").map(str::to_string),
            tools: header.get("tools").map(parse_list),
            status,
            stop_reason: header.get("stop_reason").map(str::to_string),
            pid,
            session: header.get("session").map(str::to_string),
            branch: header.get("branch").map(str::to_string),
            commit: header.get("commit").map(str::to_string),
            header,
            body: Body::parse(body_text),
        })
    }

    /// Status with an absent field read as backlog.
    pub fn effective_status(&self) -> Status {
        self.status.unwrap_or(Status::Backlog)
    }
}

/// Human-facing name derived from the file stem: date prefix dropped, dashes as spaces.
pub fn display_name(name: &str) -> String {
    let stem = strip_date_prefix(name);
    stem.replace(['-', '_'], " ").trim().to_string()
}

fn strip_date_prefix(name: &str) -> &str {
    let bytes = name.as_bytes();
    let shaped = bytes.len() > 11
        && bytes[..10]
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 4 || i == 7 { *b == b'-' } else { b.is_ascii_digit() })
        && bytes[10] == b'-';
    if shaped { &name[11..] } else { name }
}

/// Normalize a reference (`previous`, `parent`) to a bare stem: no directory, no `.md`.
pub fn reference_stem(reference: &str) -> &str {
    let base = reference.rsplit('/').next().unwrap_or(reference);
    base.strip_suffix(".md").unwrap_or(base)
}

pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| unquote(s.trim()).to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn unquote(v: &str) -> &str {
    if v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
    {
        return &v[1..v.len() - 1];
    }
    v
}

pub(crate) fn parse_header(text: &str) -> Result<Header> {
    let mut fields = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (key, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed header line '{trimmed}'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("malformed header line '{trimmed}'"));
        }
        fields.push((key.to_string(), unquote(value.trim()).to_string()));
    }
    Ok(Header { fields })
}

/// Split a document into (header, body). Returns None without both delimiters.
pub(crate) fn split_header(contents: &str) -> Option<(&str, &str)> {
    let first_end = contents.find('\n')?;
    if contents[..first_end].trim_end() != DELIMITER {
        return None;
    }
    let after = &contents[first_end + 1..];
    let mut offset = 0;
    for line in after.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            return Some((&after[..offset], &after[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Rewrite named header fields in place.
///
/// `Some(value)` replaces an existing line (keeping its position) or appends
/// the field at the end of the header; `None` removes the field. Body text is
/// returned byte-for-byte.
pub fn set_header_fields(contents: &str, updates: &[(&str, Option<String>)]) -> Result<String> {
    let (header_text, body_text) = split_header(contents)
        .ok_or_else(|| anyhow!("missing '{DELIMITER}' header delimiters"))?;

    let mut lines: Vec<String> = Vec::new();
    let mut applied = vec![false; updates.len()];

    for line in header_text.lines() {
        let key = line.split_once(':').map(|(k, _)| k.trim());
        let update = key.and_then(|k| updates.iter().position(|(uk, _)| *uk == k));
        match update {
            Some(idx) if applied[idx] => {}
            Some(idx) => {
                applied[idx] = true;
                if let Some(value) = &updates[idx].1 {
                    lines.push(format!("{}: {}", updates[idx].0, value));
                }
            }
            None => lines.push(line.to_string()),
        }
    }
    for (idx, (key, value)) in updates.iter().enumerate() {
        if applied[idx] {
            continue;
        }
        if let Some(value) = value {
            lines.push(format!("{key}: {value}"));
        }
    }

    let mut buf = String::with_capacity(contents.len() + 64);
    buf.push_str(DELIMITER);
    buf.push('\n');
    for line in &lines {
        buf.push_str(line);
        buf.push('\n');
    }
    buf.push_str(DELIMITER);
    buf.push('\n');
    buf.push_str(body_text);
    Ok(buf)
}
