//! JSONL query log: one line per answered question.
//!
//! Files are named `run_YYYYMMDD.jsonl` and rotate to `.1`, `.2`, ... once
//! they pass `MAX_LOG_SIZE` (at most 5 rotations are kept).

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use finquery::{Answer, ParamValue, UserQuery};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Log size before rotation (50 MB).
pub const MAX_LOG_SIZE: u64 = 50 * 1024 * 1024;

/// Rotated files kept next to the live log.
pub const MAX_ROTATIONS: u32 = 5;

/// Rows of the result kept in an entry.
const SAMPLE_ROWS: usize = 10;

/// One logged question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub timestamp: String,
    pub query_id: String,
    pub query: String,
    pub intent: Option<UserQuery>,
    pub sql: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    pub execution_time_ms: u64,
    pub result_count: usize,
    pub error: Option<String>,
    pub chart_generated: bool,
    pub chart_path: Option<String>,
    #[serde(default)]
    pub result_sample: Vec<serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl QueryLogEntry {
    /// Build an entry from a finished answer.
    pub fn from_answer(answer: &Answer, execution_time_ms: u64) -> Self {
        let meta = &answer.metadata;
        let mut result_sample: Vec<serde_json::Value> =
            meta.result_sample.iter().take(SAMPLE_ROWS).cloned().collect();
        if meta.result_count > SAMPLE_ROWS {
            result_sample.push(serde_json::json!({
                "_info": format!("... {} more rows not shown", meta.result_count - SAMPLE_ROWS)
            }));
        }

        Self {
            timestamp: Utc::now().to_rfc3339(),
            query_id: Uuid::new_v4().to_string(),
            query: meta.query.clone(),
            intent: meta.intent.clone(),
            sql: meta.sql.clone(),
            params: meta.params.clone(),
            execution_time_ms,
            result_count: meta.result_count,
            error: meta.error.clone(),
            chart_generated: answer.chart_path.is_some(),
            chart_path: answer.chart_path.as_ref().map(|p| p.display().to_string()),
            result_sample,
            metadata: serde_json::json!({
                "query_type": meta.intent.as_ref().map(|q| q.intent.as_str()),
                "warnings": meta.warnings,
                "suggestions": meta.suggestions,
                "stages": meta.stages,
            }),
        }
    }
}

/// Append-only JSONL query log with rotation.
pub struct QueryLogger {
    file: File,
    path: PathBuf,
    current_size: u64,
    max_size: u64,
}

impl QueryLogger {
    /// Open today's log inside `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let name = format!("run_{}.jsonl", Local::now().format("%Y%m%d"));
        Self::open_file(&dir.join(name))
    }

    /// Open or create a specific log file.
    pub fn open_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open query log: {}", path.display()))?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
            max_size: MAX_LOG_SIZE,
        })
    }

    /// Override the rotation threshold.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&mut self, entry: &QueryLogEntry) -> Result<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }
        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}").context("failed to write query log")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Log an answer and return its query id.
    pub fn log_answer(&mut self, answer: &Answer, execution_time_ms: u64) -> Result<String> {
        let entry = QueryLogEntry::from_answer(answer, execution_time_ms);
        self.log(&entry)?;
        Ok(entry.query_id)
    }

    fn entries(&self) -> Result<Vec<QueryLogEntry>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("failed to read query log"),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "skipping malformed query log line"),
            }
        }
        Ok(entries)
    }

    /// Find an entry by id in the live log.
    pub fn get(&self, query_id: &str) -> Result<Option<QueryLogEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| e.query_id == query_id))
    }

    /// The newest `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<QueryLogEntry>> {
        let mut entries = self.entries()?;
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        entries.reverse();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// `run.jsonl` to `run.jsonl.1`, `.1` to `.2`, and so on.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("failed to reopen query log after rotation")?;
        self.current_size = 0;
        Ok(())
    }
}

/// Path of a rotated log: `run_20250715.jsonl.2`.
pub fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("run.jsonl")
    );
    base.with_file_name(name)
}
