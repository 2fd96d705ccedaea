use anyhow::Result;

use crate::airtable::{AirtableDestinations, AirtableSource, ApiClient};
use crate::archive::audit;
use crate::archive::config::ArchiverConfig;
use crate::archive::lock;
use crate::archive::paths::{ArchiverPaths, resolve_paths};
use crate::archive::pipeline::{self, Collaborators, PipelineSettings, RunSummary};
use crate::archive::report::RunStatus;
use crate::archive::state;
use crate::archive::util::now_epoch_secs;
use crate::archive::warn::{self, WarnEvent};
use crate::commands::{CommandReport, load_config_or_report, ledger_store, run_log_store};
use crate::error::ArchiveError;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

pub fn pipeline_settings(cfg: &ArchiverConfig, dry_run: bool) -> Result<PipelineSettings> {
    Ok(PipelineSettings {
        frequency: cfg.archive.frequency,
        timezone: cfg.timezone()?,
        date_field: cfg.source.date_field.clone(),
        flag_field: cfg.source.flag_field.clone(),
        source_table: cfg.source.table.clone(),
        workspace_id: cfg.archive.workspace_id.clone(),
        link_base: cfg.api.link_base.clone(),
        dry_run,
    })
}

fn execute(cfg: &ArchiverConfig, paths: &ArchiverPaths, dry_run: bool) -> Result<RunSummary> {
    let client = ApiClient::new(&cfg.api)?;
    let source = AirtableSource::new(&client, &cfg.source.base_id, &cfg.source.table);
    let destinations = AirtableDestinations::new(&client);
    let ledger = ledger_store(cfg, paths, Some(&client))?;
    let run_log = run_log_store(cfg, paths, Some(&client))?;
    let collab = Collaborators {
        source: &source,
        destinations: &destinations,
        ledger: ledger.as_ref(),
        run_log: run_log.as_ref(),
    };
    pipeline::run(&collab, &pipeline_settings(cfg, dry_run)?)
}

fn describe(report: &mut CommandReport, summary: &RunSummary) {
    let entry = &summary.entry;
    report.detail(format!("run_id={}", entry.run_id));
    report.detail(format!("dry_run={}", summary.dry_run));
    report.detail(format!("frequency={}", entry.frequency_used));
    report.detail(format!("total_processed={}", entry.total_processed));
    report.detail(format!("skipped_undated={}", summary.skipped_undated));

    if summary.dry_run {
        for planned in &summary.plan {
            report.detail(format!(
                "plan partition={} name=\"{}\" records={} batches={} destination={}",
                planned.partition_key,
                planned.display_name,
                planned.records,
                planned.batches,
                planned.existing_destination.as_deref().unwrap_or("new")
            ));
        }
        return;
    }

    report.detail(format!("status={}", entry.status.label()));
    report.detail(format!("total_archived={}", entry.total_archived));
    report.detail(format!("duration_seconds={:.3}", entry.duration_seconds));
    for (partition, count) in &summary.partition_counts {
        report.detail(format!("archived partition={partition} records={count}"));
    }
    if !entry.periods_touched.is_empty() {
        report.detail(format!("created_periods={}", entry.periods_touched.join(",")));
    }
    if !entry.destinations_touched.is_empty() {
        report.detail(format!(
            "destinations={}",
            entry.destinations_touched.join(",")
        ));
    }
    for err in &entry.errors {
        report.detail(format!("error={err}"));
    }
    if entry.status == RunStatus::Failure {
        report.issue(format!("run {} failed", entry.run_id));
    }
    if let Some(err) = &summary.log_error {
        report.issue(format!("run log write failed: {err}"));
    }
}

fn record_state(paths: &ArchiverPaths, summary: &RunSummary, report: &mut CommandReport) {
    let saved = state::load(paths).and_then(|mut st| {
        st.record_run(&summary.entry, now_epoch_secs()?);
        state::save(paths, &st)
    });
    match saved {
        Ok(file) => report.detail(format!("state_file={}", file.display())),
        Err(err) => report.issue(format!("state write failed: {err:#}")),
    }
}

/// The audit log trails the run log; a failed append is reported on stderr
/// and does not stop the run.
fn audit_event(paths: &ArchiverPaths, phase: &str, status: &str, message: &str) {
    if let Err(err) = audit::append_event(paths, phase, status, message) {
        warn::emit(WarnEvent {
            code: "AUDIT_WRITE_FAILED",
            stage: "audit",
            action: phase,
            partition: "",
            destination: "",
            retry: "none",
            reason: status,
            err: &format!("{err:#}"),
        });
    }
}

pub fn run(opts: &RunOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("run");
    let Some(cfg) = load_config_or_report(&mut report) else {
        return Ok(report);
    };
    // Dry runs read the source and the ledger through the API as well.
    if let Err(err) = cfg.require_api_key() {
        report.archive_error(&ArchiveError::InvalidConfig(format!("{err:#}")));
        return Ok(report);
    }

    let paths = resolve_paths()?;
    report.detail(format!(
        "source={}/{}",
        cfg.source.base_id, cfg.source.table
    ));

    let guard = if opts.dry_run {
        None
    } else {
        match lock::acquire(&paths, &cfg.source.base_id, &cfg.source.table) {
            Ok(guard) => Some(guard),
            Err(err) => {
                match err.downcast_ref::<ArchiveError>() {
                    Some(archive_err) => report.archive_error(archive_err),
                    None => report.issue(format!("run lock unavailable: {err:#}")),
                }
                audit_event(&paths, "run", "locked", &format!("{err:#}"));
                return Ok(report);
            }
        }
    };

    if let Some(held) = &guard {
        report.detail(format!("lock_file={}", held.path().display()));
    }

    let phase = if opts.dry_run { "dry-run" } else { "run" };
    audit_event(
        &paths,
        phase,
        "started",
        &format!(
            "source={}/{} frequency={}",
            cfg.source.base_id, cfg.source.table, cfg.archive.frequency
        ),
    );

    let summary = match execute(&cfg, &paths, opts.dry_run) {
        Ok(summary) => summary,
        Err(err) => {
            audit_event(&paths, phase, "error", &format!("{err:#}"));
            report.issue(format!("run could not complete: {err:#}"));
            return Ok(report);
        }
    };

    describe(&mut report, &summary);
    if opts.dry_run {
        audit_event(
            &paths,
            phase,
            "planned",
            &format!("partitions={}", summary.plan.len()),
        );
        return Ok(report);
    }

    record_state(&paths, &summary, &mut report);
    audit_event(
        &paths,
        phase,
        summary.entry.status.label(),
        &format!(
            "run_id={} processed={} archived={} errors={}",
            summary.entry.run_id,
            summary.entry.total_processed,
            summary.entry.total_archived,
            summary.entry.errors.len()
        ),
    );
    drop(guard);
    Ok(report)
}
