use crate::archive::paths::ArchiverPaths;
use crate::archive::report::RunLogEntry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverState {
    pub schema_version: u32,
    pub last_run_id: Option<String>,
    pub last_run_epoch_secs: Option<u64>,
    pub last_status: Option<String>,
    pub last_success_epoch_secs: Option<u64>,
    pub last_total_archived: usize,
}

impl Default for ArchiverState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_run_id: None,
            last_run_epoch_secs: None,
            last_status: None,
            last_success_epoch_secs: None,
            last_total_archived: 0,
        }
    }
}

impl ArchiverState {
    /// A `PartialSuccess` still moved data forward, so it counts as a
    /// successful run for scheduling.
    pub fn record_run(&mut self, entry: &RunLogEntry, now_epoch_secs: u64) {
        self.last_run_id = Some(entry.run_id.clone());
        self.last_run_epoch_secs = Some(now_epoch_secs);
        self.last_status = Some(entry.status.label().to_string());
        self.last_total_archived = entry.total_archived;
        if entry.status != crate::archive::report::RunStatus::Failure {
            self.last_success_epoch_secs = Some(now_epoch_secs);
        }
    }

    /// Seconds until the next scheduled run is due; `0` when due now.
    pub fn due_in(&self, now_epoch_secs: u64, interval_secs: u64) -> u64 {
        match self.last_success_epoch_secs {
            Some(last) => (last + interval_secs).saturating_sub(now_epoch_secs),
            None => 0,
        }
    }
}

pub fn state_file_path(paths: &ArchiverPaths) -> PathBuf {
    paths.state_dir.join("archiver_state.json")
}

pub fn load(paths: &ArchiverPaths) -> Result<ArchiverState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(ArchiverState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: ArchiverState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &ArchiverPaths, state: &ArchiverState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    let parent = paths.state_dir.as_path();
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let data = serde_json::to_string_pretty(state)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage {}", file.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())?;
    tmp.persist(&file)
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::period::Frequency;
    use crate::archive::report::{RunContext, RunStatus};
    use crate::error::ArchiveError;

    #[test]
    fn missing_state_loads_defaults() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = ArchiverPaths::under(tmp.path());
        let state = load(&paths).expect("load");
        assert_eq!(state, ArchiverState::default());
        assert_eq!(state.due_in(1_000, 60), 0);
    }

    #[test]
    fn save_then_load_keeps_last_run() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = ArchiverPaths::under(tmp.path());
        let entry = RunContext::with_run_id("Run_42".into(), Frequency::Monthly).finish();

        let mut state = ArchiverState::default();
        state.record_run(&entry, 5_000);
        save(&paths, &state).expect("save");

        let loaded = load(&paths).expect("load");
        assert_eq!(loaded.last_run_id.as_deref(), Some("Run_42"));
        assert_eq!(loaded.last_status.as_deref(), Some("Success"));
        assert_eq!(loaded.due_in(5_030, 60), 30);
        assert_eq!(loaded.due_in(6_000, 60), 0);
    }

    #[test]
    fn failed_run_does_not_move_the_schedule() {
        let mut ctx = RunContext::with_run_id("Run_7".into(), Frequency::Monthly);
        ctx.record_error(&ArchiveError::SourceUnreadable("503".into()));
        let entry = ctx.finish();
        assert_eq!(entry.status, RunStatus::Failure);

        let mut state = ArchiverState::default();
        state.record_run(&entry, 9_000);
        assert_eq!(state.last_success_epoch_secs, None);
        assert_eq!(state.last_status.as_deref(), Some("Failure"));
    }
}
