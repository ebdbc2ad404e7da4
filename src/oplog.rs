//! Structured observability log: JSONL entries in date-partitioned files
//! (`ops-YYYY-MM-DD.jsonl`). Every gateway attempt, failover and dispatch
//! lands here; callers never learn which backend served them except through
//! this side channel.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OpLogEntry {
    pub(crate) ts_utc: i64,
    /// "gateway" | "executor" | "conversation" | "maintenance"
    pub(crate) component: String,
    /// e.g. "attempt", "failover", "dispatch", "replay_ignored"
    pub(crate) event: String,
    #[serde(default)]
    pub(crate) backend: Option<String>,
    #[serde(default)]
    pub(crate) latency_ms: Option<u64>,
    /// "ok" | "error" | "timeout" | "schema_mismatch"
    pub(crate) outcome: String,
    #[serde(default)]
    pub(crate) detail: Option<String>,
}

impl OpLogEntry {
    pub(crate) fn new(component: &str, event: &str, outcome: &str) -> Self {
        OpLogEntry {
            ts_utc: Utc::now().timestamp(),
            component: component.to_string(),
            event: event.to_string(),
            backend: None,
            latency_ms: None,
            outcome: outcome.to_string(),
            detail: None,
        }
    }

    pub(crate) fn backend(mut self, backend: &str) -> Self {
        self.backend = Some(backend.to_string());
        self
    }

    pub(crate) fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }

    pub(crate) fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OpLog {
    dir: PathBuf,
}

impl OpLog {
    pub(crate) fn new(dir: PathBuf) -> Self {
        OpLog { dir }
    }

    /// Append one entry. Logging failures are reported to stderr and
    /// swallowed; observability must never abort a chain.
    pub(crate) fn append(&self, entry: OpLogEntry) {
        if let Err(e) = self.try_append(&entry) {
            eprintln!("[oplog] failed to write entry: {e}");
        }
    }

    fn try_append(&self, entry: &OpLogEntry) -> Result<(), Box<dyn std::error::Error>> {
        fs::create_dir_all(&self.dir)?;
        let date_str = Utc::now().format("%Y-%m-%d");
        let path = self.dir.join(format!("ops-{date_str}.jsonl"));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Read the newest `limit` entries across the most recent log files.
/// Used by the `status` command and by tests.
pub(crate) fn load_recent_entries(dir: &Path, limit: usize) -> Vec<OpLogEntry> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("ops-") && n.ends_with(".jsonl"))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => return Vec::new(),
    };
    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    files.truncate(7);

    let mut collected = Vec::new();
    for path in &files {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(_) => continue,
        };
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { continue };
            if let Ok(entry) = serde_json::from_str::<OpLogEntry>(&line) {
                collected.push(entry);
            }
        }
    }
    collected.sort_by_key(|e| e.ts_utc);
    if collected.len() > limit {
        collected.drain(..collected.len() - limit);
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("aura_test")
            .join(format!("oplog_{}_{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_append_and_load() {
        let dir = temp_log_dir("append");
        let log = OpLog::new(dir.clone());
        log.append(
            OpLogEntry::new("gateway", "attempt", "ok")
                .backend("local")
                .latency_ms(42),
        );
        log.append(OpLogEntry::new("gateway", "failover", "error").detail("timed out"));

        let entries = load_recent_entries(&dir, 10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "attempt");
        assert_eq!(entries[0].backend.as_deref(), Some("local"));
        assert_eq!(entries[1].event, "failover");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_respects_limit() {
        let dir = temp_log_dir("limit");
        let log = OpLog::new(dir.clone());
        for i in 0..5 {
            log.append(OpLogEntry::new("gateway", "attempt", "ok").latency_ms(i));
        }
        let entries = load_recent_entries(&dir, 3);
        assert_eq!(entries.len(), 3);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = temp_log_dir("missing");
        assert!(load_recent_entries(&dir, 10).is_empty());
    }
}
