use crate::archive::registry::ArchiveDescriptor;
use crate::archive::report::RunLogEntry;
use crate::archive::store::{LedgerStore, RunLogStore};
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: T = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse line {} in {}", idx + 1, path.display())
        })?;
        out.push(entry);
    }
    Ok(out)
}

fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let line = format!("{}\n", serde_json::to_string(value)?);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append {}", path.display()))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Archive ledger kept as one JSON descriptor per line.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LedgerStore for FileLedger {
    fn ensure(&self) -> Result<()> {
        ensure_parent(&self.path)
    }

    fn load_all(&self) -> Result<Vec<ArchiveDescriptor>> {
        read_jsonl(&self.path)
    }

    fn append(&self, descriptor: &ArchiveDescriptor) -> Result<()> {
        append_jsonl(&self.path, descriptor)
    }
}

#[derive(Debug, Clone)]
pub struct FileRunLog {
    path: PathBuf,
}

impl FileRunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RunLogStore for FileRunLog {
    fn ensure(&self) -> Result<()> {
        ensure_parent(&self.path)
    }

    fn append(&self, entry: &RunLogEntry) -> Result<()> {
        append_jsonl(&self.path, entry)
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunLogEntry>> {
        let mut all: Vec<RunLogEntry> = read_jsonl(&self.path)?;
        let skip = all.len().saturating_sub(limit);
        Ok(all.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::report::RunStatus;
    use tempfile::tempdir;

    fn descriptor(key: &str) -> ArchiveDescriptor {
        ArchiveDescriptor {
            partition_key: key.to_string(),
            destination_name: format!("Archive {key}"),
            destination_id: format!("app{key}"),
            workspace_id: "wsp1".to_string(),
            link: format!("https://airtable.com/app{key}"),
            primary_collection_id: format!("tbl{key}"),
        }
    }

    #[test]
    fn file_ledger_appends_and_reloads_in_order() {
        let tmp = tempdir().expect("tempdir");
        let ledger = FileLedger::new(tmp.path().join("nested/ledger.jsonl"));
        assert!(ledger.load_all().expect("empty load").is_empty());

        ledger.append(&descriptor("2024_Q1")).expect("append 1");
        ledger.append(&descriptor("2024_Q2")).expect("append 2");

        let rows = ledger.load_all().expect("load");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].partition_key, "2024_Q1");
        assert_eq!(rows[1].primary_collection_id, "tbl2024_Q2");
    }

    #[test]
    fn file_ledger_reports_corrupt_lines() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("ledger.jsonl");
        fs::write(&path, "{not json}\n").expect("write");
        let err = FileLedger::new(&path).load_all().expect_err("should fail");
        assert!(format!("{err:#}").contains("line 1"));
    }

    #[test]
    fn file_run_log_recent_returns_tail() {
        let tmp = tempdir().expect("tempdir");
        let log = FileRunLog::new(tmp.path().join("runs.jsonl"));
        for n in 0..5 {
            log.append(&RunLogEntry {
                run_id: format!("Run_{n}"),
                timestamp: "2024-01-01T00:00:00.000Z".to_string(),
                status: RunStatus::Success,
                total_processed: n,
                total_archived: n,
                errors: Vec::new(),
                duration_seconds: 0.0,
                frequency_used: "monthly".to_string(),
                periods_touched: Vec::new(),
                destinations_touched: Vec::new(),
            })
            .expect("append");
        }
        let tail = log.recent(2).expect("recent");
        let ids = tail.iter().map(|e| e.run_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["Run_3", "Run_4"]);
    }
}
