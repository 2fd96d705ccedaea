use crate::archive::migrate::{COPY_BATCH_SIZE, RecordMigrator};
use crate::archive::period::{self, Frequency, PeriodKey};
use crate::archive::registry::{ArchiveRegistry, RegistrySettings};
use crate::archive::report::{RunContext, RunLogEntry, RunReporter};
use crate::archive::schema::project_schema;
use crate::archive::store::{DestinationApi, LedgerStore, RunLogStore, SourceRecord, SourceStore};
use crate::archive::util::progress;
use crate::archive::warn::{self, WarnEvent};
use crate::error::ArchiveError;
use anyhow::Result;
use chrono_tz::Tz;
use std::collections::BTreeMap;

pub struct Collaborators<'a> {
    pub source: &'a dyn SourceStore,
    pub destinations: &'a dyn DestinationApi,
    pub ledger: &'a dyn LedgerStore,
    pub run_log: &'a dyn RunLogStore,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frequency: Frequency,
    pub timezone: Tz,
    pub date_field: String,
    pub flag_field: String,
    pub source_table: String,
    pub workspace_id: String,
    pub link_base: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub period: PeriodKey,
    pub records: Vec<SourceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPartition {
    pub partition_key: String,
    pub display_name: String,
    pub records: usize,
    pub batches: usize,
    pub existing_destination: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub entry: RunLogEntry,
    pub partition_counts: BTreeMap<String, usize>,
    pub skipped_undated: usize,
    pub plan: Vec<PlannedPartition>,
    pub dry_run: bool,
    /// Set when the run-log store rejected the entry.
    pub log_error: Option<String>,
}

/// Group unflagged records by period. Records without a usable date are
/// left out and only counted.
pub fn partition_records(
    records: Vec<SourceRecord>,
    settings: &PipelineSettings,
) -> (Vec<Partition>, usize) {
    let mut grouped: BTreeMap<PeriodKey, Vec<SourceRecord>> = BTreeMap::new();
    let mut skipped = 0usize;
    for record in records {
        let date = record
            .field(&settings.date_field)
            .and_then(|v| period::parse_record_date(v, settings.timezone));
        let Some(date) = date else {
            skipped += 1;
            continue;
        };
        let key = period::resolve(date, settings.frequency);
        grouped.entry(key).or_default().push(record);
    }
    let partitions = grouped
        .into_iter()
        .map(|(period, records)| Partition { period, records })
        .collect();
    (partitions, skipped)
}

fn finish(
    ctx: RunContext,
    reporter: &RunReporter<'_>,
    skipped_undated: usize,
    plan: Vec<PlannedPartition>,
) -> RunSummary {
    let partition_counts = ctx.partition_counts.clone();
    let entry = ctx.finish();
    let log_error = reporter.emit(&entry).err().map(|err| format!("{err:#}"));
    RunSummary {
        entry,
        partition_counts,
        skipped_undated,
        plan,
        dry_run: false,
        log_error,
    }
}

fn abort(ctx: RunContext, reporter: &RunReporter<'_>, err: ArchiveError) -> RunSummary {
    warn::emit(WarnEvent {
        code: err.code().as_str(),
        stage: "fetch",
        action: "abort-run",
        partition: "",
        destination: "",
        retry: "retry-next-run",
        reason: "run-aborted-before-writes",
        err: &err.to_string(),
    });
    let mut ctx = ctx;
    ctx.record_error(&err);
    finish(ctx, reporter, 0, Vec::new())
}

/// One archive pass: bootstrap → project schema → fetch → partition →
/// resolve destinations → migrate → report.
///
/// Per-call failures end up in the returned entry. `Err` is reserved for
/// the run-log store itself being unusable, when nothing could be reported.
pub fn run(collab: &Collaborators<'_>, settings: &PipelineSettings) -> Result<RunSummary> {
    let ctx = RunContext::new(settings.frequency)?;
    let reporter = RunReporter::new(collab.run_log);

    if settings.dry_run {
        return plan_only(collab, settings, ctx);
    }

    collab.run_log.ensure()?;

    if let Err(err) = collab.ledger.ensure() {
        let err = ArchiveError::LedgerUnreadable(format!("{err:#}"));
        return Ok(abort(ctx, &reporter, err));
    }
    match collab.source.ensure_flag_field(&settings.flag_field) {
        Ok(true) => progress(&format!("created flag field `{}`", settings.flag_field)),
        Ok(false) => {}
        Err(err) => {
            let err = ArchiveError::SourceUnreadable(format!(
                "flag field `{}` could not be ensured: {err:#}",
                settings.flag_field
            ));
            return Ok(abort(ctx, &reporter, err));
        }
    }

    let fields = match collab.source.list_fields() {
        Ok(fields) => fields,
        Err(err) => {
            let err = ArchiveError::SourceUnreadable(format!("{err:#}"));
            return Ok(abort(ctx, &reporter, err));
        }
    };
    let schema = project_schema(&fields, &settings.flag_field);
    let field_names = schema.iter().map(|f| f.name.clone()).collect::<Vec<_>>();

    let flag_field = settings.flag_field.clone();
    let unflagged = match collab
        .source
        .list_records(&|r: &SourceRecord| !r.is_flagged(&flag_field))
    {
        Ok(records) => records,
        Err(err) => {
            let err = ArchiveError::SourceUnreadable(format!("{err:#}"));
            return Ok(abort(ctx, &reporter, err));
        }
    };

    let (partitions, skipped_undated) = partition_records(unflagged, settings);
    let mut ctx = ctx;
    ctx.total_processed = partitions.iter().map(|p| p.records.len()).sum();
    progress(&format!(
        "found {} eligible records in {} partitions ({} without a date skipped)",
        ctx.total_processed,
        partitions.len(),
        skipped_undated
    ));

    if ctx.total_processed == 0 {
        return Ok(finish(ctx, &reporter, skipped_undated, Vec::new()));
    }

    let mut registry = match ArchiveRegistry::load(
        collab.ledger,
        collab.destinations,
        registry_settings(settings),
    ) {
        Ok(registry) => registry,
        Err(err) => {
            let err = ArchiveError::LedgerUnreadable(format!("{err:#}"));
            return Ok(abort(ctx, &reporter, err));
        }
    };

    let periods = partitions
        .iter()
        .map(|p| p.period.clone())
        .collect::<Vec<_>>();
    let targets = registry.ensure_destinations(&periods, &schema, &mut ctx);

    let migrator = RecordMigrator::new(collab.source, collab.destinations, &settings.flag_field);
    for partition in &partitions {
        let Some(target) = targets.get(&partition.period.key) else {
            progress(&format!(
                "skipping {} records of {}: destination unresolved",
                partition.records.len(),
                partition.period.key
            ));
            continue;
        };
        let copied = migrator.migrate_partition(
            &partition.period.key,
            target,
            &partition.records,
            &field_names,
            &mut ctx,
        );
        progress(&format!(
            "{}: {copied} of {} records added",
            partition.period.display_name,
            partition.records.len()
        ));
    }

    Ok(finish(ctx, &reporter, skipped_undated, Vec::new()))
}

fn registry_settings(settings: &PipelineSettings) -> RegistrySettings {
    RegistrySettings {
        workspace_id: settings.workspace_id.clone(),
        table_name: settings.source_table.clone(),
        link_base: settings.link_base.clone(),
    }
}

/// Read-only rehearsal: no bootstrap, no creation, no copy, no run log.
fn plan_only(
    collab: &Collaborators<'_>,
    settings: &PipelineSettings,
    mut ctx: RunContext,
) -> Result<RunSummary> {
    let flag_field = settings.flag_field.clone();
    let unflagged = collab
        .source
        .list_records(&|r: &SourceRecord| !r.is_flagged(&flag_field))
        .map_err(|err| ArchiveError::SourceUnreadable(format!("{err:#}")))?;
    let (partitions, skipped_undated) = partition_records(unflagged, settings);
    ctx.total_processed = partitions.iter().map(|p| p.records.len()).sum();

    let existing = collab
        .ledger
        .load_all()
        .map_err(|err| ArchiveError::LedgerUnreadable(format!("{err:#}")))?;
    let plan = partitions
        .iter()
        .map(|p| PlannedPartition {
            partition_key: p.period.key.clone(),
            display_name: p.period.display_name.clone(),
            records: p.records.len(),
            batches: p.records.len().div_ceil(COPY_BATCH_SIZE),
            existing_destination: existing
                .iter()
                .find(|d| d.partition_key == p.period.key)
                .map(|d| d.destination_id.clone()),
        })
        .collect();

    Ok(RunSummary {
        entry: ctx.finish(),
        partition_counts: BTreeMap::new(),
        skipped_undated,
        plan,
        dry_run: true,
        log_error: None,
    })
}
