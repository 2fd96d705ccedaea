use crate::archive::registry::DestinationTarget;
use crate::archive::report::RunContext;
use crate::archive::store::{DestinationApi, RecordUpdate, SourceRecord, SourceStore};
use crate::archive::util::progress;
use crate::archive::warn::{self, WarnEvent};
use crate::error::ArchiveError;
use serde_json::{Map, Value};

/// Records per bulk-create call.
pub const COPY_BATCH_SIZE: usize = 10;
/// Hard ceiling of the source API for one bulk update.
pub const FLAG_UPDATE_CHUNK: usize = 50;

/// Destination fields take plain values: a choice object collapses to its
/// name, a list of choice objects to a list of names.
pub fn flatten_value(value: &Value) -> Value {
    match value {
        Value::Object(obj) => match obj.get("name") {
            Some(name) if !name.is_null() => name.clone(),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(obj) => match obj.get("name") {
                        Some(name) if !name.is_null() => name.clone(),
                        _ => item.clone(),
                    },
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

pub struct RecordMigrator<'a> {
    source: &'a dyn SourceStore,
    destinations: &'a dyn DestinationApi,
    flag_field: &'a str,
}

impl<'a> RecordMigrator<'a> {
    pub fn new(
        source: &'a dyn SourceStore,
        destinations: &'a dyn DestinationApi,
        flag_field: &'a str,
    ) -> Self {
        Self {
            source,
            destinations,
            flag_field,
        }
    }

    pub fn project_record(
        &self,
        record: &SourceRecord,
        field_names: &[String],
    ) -> Map<String, Value> {
        let mut out = Map::new();
        for name in field_names {
            if name == self.flag_field {
                continue;
            }
            if let Some(value) = record.field(name) {
                out.insert(name.clone(), flatten_value(value));
            }
        }
        out
    }

    /// Copy one batch to the destination and return how many records it
    /// took. Nothing is flagged here; a failed batch returns 0 and leaves its
    /// records eligible for the next run.
    pub fn copy_batch(
        &self,
        partition_key: &str,
        target: &DestinationTarget,
        batch_index: usize,
        batch: &[SourceRecord],
        field_names: &[String],
        ctx: &mut RunContext,
    ) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let rows = batch
            .iter()
            .map(|r| self.project_record(r, field_names))
            .collect::<Vec<_>>();

        if let Err(err) =
            self.destinations
                .create_records(&target.destination_id, &target.table, &rows)
        {
            let err = ArchiveError::BatchWriteFailure {
                destination_id: target.destination_id.clone(),
                batch_index,
                cause: format!("{err:#}"),
            };
            warn::emit(WarnEvent {
                code: err.code().as_str(),
                stage: "migrate",
                action: "bulk-create",
                partition: partition_key,
                destination: &target.destination_id,
                retry: "retry-next-run",
                reason: "batch-left-unflagged",
                err: &err.to_string(),
            });
            ctx.record_error(&err);
            return 0;
        }

        progress(&format!(
            "copied batch {batch_index} ({} records) to {}",
            batch.len(),
            target.destination_id
        ));
        ctx.record_archived(partition_key, &target.destination_id, batch.len());
        batch.len()
    }

    /// Mark already-copied records as migrated, `FLAG_UPDATE_CHUNK` per call.
    /// A failed chunk leaves copies behind that the next run copies again.
    pub fn flag_migrated(
        &self,
        partition_key: &str,
        target: &DestinationTarget,
        record_ids: &[String],
        ctx: &mut RunContext,
    ) -> Vec<ArchiveError> {
        let mut errors = Vec::new();
        for (chunk_index, chunk) in record_ids.chunks(FLAG_UPDATE_CHUNK).enumerate() {
            let updates = chunk
                .iter()
                .map(|id| {
                    let mut fields = Map::new();
                    fields.insert(self.flag_field.to_string(), Value::Bool(true));
                    RecordUpdate {
                        id: id.clone(),
                        fields,
                    }
                })
                .collect::<Vec<_>>();
            match self.source.update_records(&updates) {
                Ok(()) => progress(&format!(
                    "flagged {} records of {partition_key} as migrated",
                    updates.len()
                )),
                Err(err) => {
                    let err = ArchiveError::PartialUpdateFailure {
                        destination_id: target.destination_id.clone(),
                        chunk_index,
                        record_count: updates.len(),
                        cause: format!("{err:#}"),
                    };
                    warn::emit(WarnEvent {
                        code: err.code().as_str(),
                        stage: "migrate",
                        action: "flag-update",
                        partition: partition_key,
                        destination: &target.destination_id,
                        retry: "recopied-next-run",
                        reason: "copied-but-unflagged",
                        err: &err.to_string(),
                    });
                    ctx.record_error(&err);
                    errors.push(err);
                }
            }
        }
        errors
    }

    /// All records of one partition, in order, `COPY_BATCH_SIZE` per copy.
    /// Copied ids are flagged as soon as a full update chunk is pending and
    /// once more at the end. Returns how many were copied.
    pub fn migrate_partition(
        &self,
        partition_key: &str,
        target: &DestinationTarget,
        records: &[SourceRecord],
        field_names: &[String],
        ctx: &mut RunContext,
    ) -> usize {
        let mut copied = 0usize;
        let mut pending: Vec<String> = Vec::new();
        for (batch_index, batch) in records.chunks(COPY_BATCH_SIZE).enumerate() {
            let added =
                self.copy_batch(partition_key, target, batch_index, batch, field_names, ctx);
            if added == 0 {
                continue;
            }
            copied += added;
            pending.extend(batch.iter().map(|r| r.id.clone()));
            if pending.len() >= FLAG_UPDATE_CHUNK {
                let ready = pending.drain(..FLAG_UPDATE_CHUNK).collect::<Vec<_>>();
                self.flag_migrated(partition_key, target, &ready, ctx);
            }
        }
        if !pending.is_empty() {
            self.flag_migrated(partition_key, target, &pending, ctx);
        }
        copied
    }
}
