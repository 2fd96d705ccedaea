use crate::archive::period::Frequency;
use crate::archive::store::RunLogStore;
use crate::archive::util::{now_epoch_millis, progress};
use crate::archive::warn::{self, WarnEvent};
use crate::error::ArchiveError;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failure,
}

impl RunStatus {
    /// Matches the choice names of the run-log table.
    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Success => "Success",
            RunStatus::PartialSuccess => "Partial Success",
            RunStatus::Failure => "Failure",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Success" => Some(RunStatus::Success),
            "Partial Success" | "PartialSuccess" => Some(RunStatus::PartialSuccess),
            "Failure" => Some(RunStatus::Failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub run_id: String,
    pub timestamp: String,
    pub status: RunStatus,
    pub total_processed: usize,
    pub total_archived: usize,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
    pub frequency_used: String,
    pub periods_touched: Vec<String>,
    #[serde(default)]
    pub destinations_touched: Vec<String>,
}

/// `Failure` when the eligible set could not be read, or when there was
/// work to do, nothing got archived and errors were recorded.
pub fn derive_status(
    total_processed: usize,
    total_archived: usize,
    error_count: usize,
    aborted: bool,
) -> RunStatus {
    if aborted {
        return RunStatus::Failure;
    }
    if error_count == 0 {
        return RunStatus::Success;
    }
    if total_processed > 0 && total_archived == 0 {
        return RunStatus::Failure;
    }
    RunStatus::PartialSuccess
}

/// Everything one run accumulates. Created at run start, threaded through
/// every component by `&mut`, consumed by [`RunContext::finish`].
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    started: Instant,
    pub frequency: Frequency,
    pub total_processed: usize,
    pub total_archived: usize,
    pub errors: Vec<String>,
    pub periods_created: Vec<String>,
    pub destinations_touched: Vec<String>,
    pub partition_counts: BTreeMap<String, usize>,
    aborted: bool,
}

impl RunContext {
    pub fn new(frequency: Frequency) -> Result<Self> {
        Ok(Self::with_run_id(
            format!("Run_{}", now_epoch_millis()?),
            frequency,
        ))
    }

    pub fn with_run_id(run_id: String, frequency: Frequency) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            started: Instant::now(),
            frequency,
            total_processed: 0,
            total_archived: 0,
            errors: Vec::new(),
            periods_created: Vec::new(),
            destinations_touched: Vec::new(),
            partition_counts: BTreeMap::new(),
            aborted: false,
        }
    }

    pub fn record_error(&mut self, err: &ArchiveError) {
        if err.is_fatal() {
            self.aborted = true;
        }
        self.errors.push(format!("{}: {err}", err.code().as_str()));
    }

    pub fn record_created(&mut self, partition_key: &str) {
        self.periods_created.push(partition_key.to_string());
    }

    pub fn record_archived(&mut self, partition_key: &str, destination_id: &str, count: usize) {
        self.total_archived += count;
        *self
            .partition_counts
            .entry(partition_key.to_string())
            .or_insert(0) += count;
        if !self.destinations_touched.iter().any(|d| d == destination_id) {
            self.destinations_touched.push(destination_id.to_string());
        }
    }

    pub fn finish(self) -> RunLogEntry {
        let status = derive_status(
            self.total_processed,
            self.total_archived,
            self.errors.len(),
            self.aborted,
        );
        let elapsed = self.started.elapsed().as_millis() as f64 / 1000.0;
        RunLogEntry {
            run_id: self.run_id,
            timestamp: self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            status,
            total_processed: self.total_processed,
            total_archived: self.total_archived,
            errors: self.errors,
            duration_seconds: elapsed,
            frequency_used: self.frequency.label().to_string(),
            periods_touched: self.periods_created,
            destinations_touched: self.destinations_touched,
        }
    }
}

pub struct RunReporter<'a> {
    store: &'a dyn RunLogStore,
}

impl<'a> RunReporter<'a> {
    pub fn new(store: &'a dyn RunLogStore) -> Self {
        Self { store }
    }

    /// Persist the entry. A failed write is surfaced on stderr and returned;
    /// the entry itself is still valid for the caller's report.
    pub fn emit(&self, entry: &RunLogEntry) -> Result<()> {
        progress(&format!(
            "run {} finished status={} processed={} archived={} errors={} secs={:.3}",
            entry.run_id,
            entry.status.label(),
            entry.total_processed,
            entry.total_archived,
            entry.errors.len(),
            entry.duration_seconds
        ));
        if let Err(err) = self.store.append(entry) {
            warn::emit(WarnEvent {
                code: "RUN_LOG_WRITE_FAILED",
                stage: "report",
                action: "append-run-log",
                partition: "",
                destination: "",
                retry: "none",
                reason: "run-log-store-error",
                err: &format!("{err:#}"),
            });
            return Err(err);
        }
        Ok(())
    }
}
