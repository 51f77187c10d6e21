//! Completion-condition expressions.
//!
//! Stored form is `name("arg", "arg")` with JSON-style string literals, or the
//! bare token `always`. Parsing produces a [`Condition`]; evaluation against a
//! filesystem lives in `io::conditions`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// A parsed completion condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    FileExists { path: String },
    FileAbsent { path: String },
    FileContains { path: String, text: String },
    FileMissingText { path: String, text: String },
    Command { expr: String },
    SectionExists { text: String },
    NoSection { text: String },
    /// Never satisfied; marks a recurring item.
    Always,
}

/// Why an expression could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionParseError {
    Syntax(String),
    UnknownName(String),
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
}

impl fmt::Display for ConditionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionParseError::Syntax(msg) => write!(f, "syntax error: {msg}"),
            ConditionParseError::UnknownName(name) => write!(f, "unknown condition '{name}'"),
            ConditionParseError::Arity {
                name,
                expected,
                got,
            } => write!(f, "{name} takes {expected} argument(s), got {got}"),
        }
    }
}

impl std::error::Error for ConditionParseError {}

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z_]+)\s*\((.*)\)$").unwrap_or_else(|err| panic!("call regex: {err}"))
});

impl Condition {
    pub fn parse(expr: &str) -> Result<Self, ConditionParseError> {
        let expr = expr.trim();
        if expr == "always" {
            return Ok(Condition::Always);
        }
        let caps = CALL_RE
            .captures(expr)
            .ok_or_else(|| ConditionParseError::Syntax(format!("expected name(args) in '{expr}'")))?;
        let name = &caps[1];
        let args = parse_args(&caps[2])?;

        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ConditionParseError::Arity {
                    name: name.to_string(),
                    expected,
                    got: args.len(),
                })
            }
        };
        let mut it = args.iter().cloned();
        let mut next = || it.next().unwrap_or_default();

        let cond = match name {
            "file_exists" => {
                arity(1)?;
                Condition::FileExists { path: next() }
            }
            "file_absent" => {
                arity(1)?;
                Condition::FileAbsent { path: next() }
            }
            "file_contains" => {
                arity(2)?;
                Condition::FileContains {
                    path: next(),
                    text: next(),
                }
            }
            "file_missing_text" => {
                arity(2)?;
                Condition::FileMissingText {
                    path: next(),
                    text: next(),
                }
            }
            "command" => {
                arity(1)?;
                Condition::Command { expr: next() }
            }
            "section_exists" => {
                arity(1)?;
                Condition::SectionExists { text: next() }
            }
            "no_section" => {
                arity(1)?;
                Condition::NoSection { text: next() }
            }
            other => return Err(ConditionParseError::UnknownName(other.to_string())),
        };
        Ok(cond)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""));
        match self {
            Condition::FileExists { path } => write!(f, "file_exists({})", q(path)),
            Condition::FileAbsent { path } => write!(f, "file_absent({})", q(path)),
            Condition::FileContains { path, text } => {
                write!(f, "file_contains({}, {})", q(path), q(text))
            }
            Condition::FileMissingText { path, text } => {
                write!(f, "file_missing_text({}, {})", q(path), q(text))
            }
            Condition::Command { expr } => write!(f, "command({})", q(expr)),
            Condition::SectionExists { text } => write!(f, "section_exists({})", q(text)),
            Condition::NoSection { text } => write!(f, "no_section({})", q(text)),
            Condition::Always => f.write_str("always"),
        }
    }
}

/// Split a comma-separated list of double-quoted literals.
fn parse_args(raw: &str) -> Result<Vec<String>, ConditionParseError> {
    let bytes = raw.as_bytes();
    let mut args = Vec::new();
    let mut i = 0;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i == bytes.len() {
            if args.is_empty() {
                return Ok(args);
            }
            return Err(ConditionParseError::Syntax("trailing comma".to_string()));
        }
        if bytes[i] != b'"' {
            return Err(ConditionParseError::Syntax(format!(
                "arguments must be double-quoted strings (near '{}')",
                &raw[i..]
            )));
        }
        let start = i;
        i += 1;
        let mut escaped = false;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if !escaped => escaped = true,
                b'"' if !escaped => break,
                _ => escaped = false,
            }
            i += 1;
        }
        if i == bytes.len() {
            return Err(ConditionParseError::Syntax("unterminated string".to_string()));
        }
        let literal = &raw[start..=i];
        let value: String = serde_json::from_str(literal)
            .map_err(|err| ConditionParseError::Syntax(format!("bad string {literal}: {err}")))?;
        args.push(value);
        i += 1;

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i == bytes.len() {
            return Ok(args);
        }
        if bytes[i] != b',' {
            return Err(ConditionParseError::Syntax(format!(
                "expected ',' between arguments (near '{}')",
                &raw[i..]
            )));
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        assert_eq!(
            Condition::parse(r#"file_exists("README.md")"#),
            Ok(Condition::FileExists {
                path: "README.md".to_string()
            })
        );
        assert_eq!(
            Condition::parse(r#"file_missing_text("a.txt", "TODO")"#),
            Ok(Condition::FileMissingText {
                path: "a.txt".to_string(),
                text: "TODO".to_string()
            })
        );
        assert_eq!(
            Condition::parse(r#"command("exit 1")"#),
            Ok(Condition::Command {
                expr: "exit 1".to_string()
            })
        );
        assert_eq!(
            Condition::parse(r###"no_section("## Legacy")"###),
            Ok(Condition::NoSection {
                text: "## Legacy".to_string()
            })
        );
        assert_eq!(Condition::parse("  always "), Ok(Condition::Always));
    }

    #[test]
    fn decodes_escapes_and_embedded_commas() {
        let cond = Condition::parse(r#"file_contains("notes, draft.md", "say \"hi\"\n")"#)
            .expect("parse");
        assert_eq!(
            cond,
            Condition::FileContains {
                path: "notes, draft.md".to_string(),
                text: "say \"hi\"\n".to_string()
            }
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let cond = Condition::Command {
            expr: "grep -q \"x\" f".to_string(),
        };
        assert_eq!(Condition::parse(&cond.to_string()), Ok(cond));
    }

    #[test]
    fn rejects_unknown_names_and_bad_arity() {
        assert_eq!(
            Condition::parse(r#"file_is_big("x")"#),
            Err(ConditionParseError::UnknownName("file_is_big".to_string()))
        );
        assert!(matches!(
            Condition::parse(r#"file_contains("x")"#),
            Err(ConditionParseError::Arity { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn rejects_malformed_syntax() {
        for bad in [
            "file_exists(README.md)",
            "file_exists(\"README.md\"",
            "file_exists(\"a\" \"b\")",
            "file_exists(\"a\",)",
            "file_exists(\"unterminated)",
            "",
            "sometimes",
        ] {
            assert!(Condition::parse(bad).is_err(), "should reject {bad:?}");
        }
    }
}
