//! Per-invocation run log: a marker line, then one line per stream event.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::warn;

pub const RUN_LOG_FILE: &str = "run.log";

pub struct RunLog {
    path: PathBuf,
    out: BufWriter<File>,
}

impl RunLog {
    /// Truncate `path` and write the marker line for `label`.
    pub fn create(path: &Path, label: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create run log dir {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut log = Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        };
        log.line(&format!(
            "=== {label} started {} ===",
            Local::now().format("%Y-%m-%dT%H:%M:%S%:z")
        ));
        Ok(log)
    }

    /// Raw stdout line (JSON or not), written verbatim.
    pub fn event(&mut self, raw: &str) {
        self.line(raw);
    }

    /// Diagnostic line that did not come from the event stream.
    pub fn note(&mut self, source: &str, text: &str) {
        self.line(&format!("[{source}] {text}"));
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Flushed per line so a crash still leaves a usable log.
    fn line(&mut self, text: &str) {
        let result = writeln!(self.out, "{text}").and_then(|()| self.out.flush());
        if let Err(err) = result {
            warn!(path = %self.path.display(), %err, "run log write failed");
        }
    }
}
