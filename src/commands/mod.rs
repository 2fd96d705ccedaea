pub mod history;
pub mod ledger;
pub mod run;
pub mod status;
pub mod watch;

use crate::airtable::{ApiClient, TableLedger, TableRunLog};
use crate::archive::config::{ArchiverConfig, StoreBackend, load_config};
use crate::archive::journal::{FileLedger, FileRunLog};
use crate::archive::paths::ArchiverPaths;
use crate::archive::store::{LedgerStore, RunLogStore};
use crate::archive::warn::{self, WarnEvent};
use crate::error::ArchiveError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }

    pub fn archive_error(&mut self, err: &ArchiveError) {
        self.issue(format!("{}: {err}", err.code().as_str()));
    }
}

/// Loaded and validated config, or `None` with the reason already on the
/// report.
pub fn load_config_or_report(report: &mut CommandReport) -> Option<ArchiverConfig> {
    match load_config() {
        Ok(cfg) => Some(cfg),
        Err(err) => {
            let err = ArchiveError::InvalidConfig(format!("{err:#}"));
            warn::emit(WarnEvent {
                code: err.code().as_str(),
                stage: "config",
                action: "load",
                partition: "",
                destination: "",
                retry: "fix-config",
                reason: "config-invalid",
                err: &err.to_string(),
            });
            report.archive_error(&err);
            None
        }
    }
}

/// A client is only needed when something talks to the API.
pub fn needs_client(cfg: &ArchiverConfig) -> bool {
    cfg.ledger.backend == StoreBackend::Table
}

pub fn ledger_store<'a>(
    cfg: &ArchiverConfig,
    paths: &ArchiverPaths,
    client: Option<&'a ApiClient>,
) -> anyhow::Result<Box<dyn LedgerStore + 'a>> {
    match (cfg.ledger.backend, client) {
        (StoreBackend::File, _) => Ok(Box::new(FileLedger::new(&paths.ledger_file))),
        (StoreBackend::Table, Some(client)) => Ok(Box::new(TableLedger::new(
            client,
            &cfg.source.base_id,
            &cfg.ledger.tracking_table,
        ))),
        (StoreBackend::Table, None) => anyhow::bail!("table ledger requires an API client"),
    }
}

pub fn run_log_store<'a>(
    cfg: &ArchiverConfig,
    paths: &ArchiverPaths,
    client: Option<&'a ApiClient>,
) -> anyhow::Result<Box<dyn RunLogStore + 'a>> {
    match (cfg.ledger.backend, client) {
        (StoreBackend::File, _) => Ok(Box::new(FileRunLog::new(&paths.runs_file))),
        (StoreBackend::Table, Some(client)) => Ok(Box::new(TableRunLog::new(
            client,
            &cfg.source.base_id,
            &cfg.ledger.log_table,
        ))),
        (StoreBackend::Table, None) => anyhow::bail!("table run log requires an API client"),
    }
}
