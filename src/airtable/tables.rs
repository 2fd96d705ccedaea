//! Ledger and run log kept as two tables inside the source base.

use crate::airtable::client::ApiClient;
use crate::airtable::source::{find_table, list_tables};
use crate::archive::registry::ArchiveDescriptor;
use crate::archive::report::{RunLogEntry, RunStatus};
use crate::archive::store::{LedgerStore, RunLogStore, SourceRecord};
use crate::archive::util::progress;
use anyhow::{Context, Result};
use serde_json::{Map, Value, json};

pub fn tracking_table_fields() -> Value {
    json!([
        {"name": "Archive Key", "type": "singleLineText"},
        {"name": "Archive Name", "type": "singleLineText"},
        {"name": "Archive ID", "type": "singleLineText"},
        {"name": "Workspace ID", "type": "singleLineText"},
        {"name": "Link", "type": "url"},
        {"name": "Primary Table ID", "type": "singleLineText"},
    ])
}

pub fn log_table_fields() -> Value {
    json!([
        {"name": "Run ID", "type": "singleLineText"},
        {"name": "Timestamp", "type": "dateTime", "options": {
            "dateFormat": {"name": "iso"},
            "timeFormat": {"name": "24hour"},
            "timeZone": "utc",
        }},
        {"name": "Status", "type": "singleSelect", "options": {"choices": [
            {"name": "Success", "color": "greenLight1"},
            {"name": "Failure", "color": "redBright"},
            {"name": "Partial Success", "color": "orangeLight1"},
        ]}},
        {"name": "Total Records Processed", "type": "number", "options": {"precision": 0}},
        {"name": "Total Records Archived", "type": "number", "options": {"precision": 0}},
        {"name": "Errors", "type": "multilineText"},
        {"name": "Execution Time (seconds)", "type": "number", "options": {"precision": 0}},
        {"name": "Frequency Used", "type": "singleLineText"},
        {"name": "Base IDs Created/Updated", "type": "multilineText"},
        {"name": "Archived Periods", "type": "multilineText"},
    ])
}

/// Create `name` in `base_id` unless it already exists. Returns `true` when
/// it had to be created.
fn ensure_table(client: &ApiClient, base_id: &str, name: &str, fields: Value) -> Result<bool> {
    let tables = list_tables(client, base_id)?;
    if find_table(&tables, name).is_some() {
        return Ok(false);
    }
    progress(&format!("creating table `{name}` in {base_id}"));
    client
        .create_json(
            &["v0", "meta", "bases", base_id, "tables"],
            &json!({ "name": name, "fields": fields }),
        )
        .with_context(|| format!("failed to create table `{name}`"))?;
    Ok(true)
}

/// Rows of `table`, or none when the table has not been created yet.
fn rows_if_present(client: &ApiClient, base_id: &str, table: &str) -> Result<Vec<SourceRecord>> {
    let tables = list_tables(client, base_id)?;
    if find_table(&tables, table).is_none() {
        progress(&format!("table `{table}` not found in {base_id}, reading as empty"));
        return Ok(Vec::new());
    }
    client.list_all_records(base_id, table)
}

fn append_row(
    client: &ApiClient,
    base_id: &str,
    table: &str,
    fields: Map<String, Value>,
) -> Result<()> {
    client.post_json(
        &["v0", base_id, table],
        &json!({ "records": [{ "fields": fields }] }),
    )?;
    Ok(())
}

fn text(fields: &Map<String, Value>, name: &str) -> String {
    match fields.get(name) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn lines(fields: &Map<String, Value>, name: &str) -> Vec<String> {
    text(fields, name)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn number(fields: &Map<String, Value>, name: &str) -> f64 {
    fields.get(name).and_then(Value::as_f64).unwrap_or(0.0)
}

pub fn descriptor_fields(descriptor: &ArchiveDescriptor) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("Archive Key".into(), json!(descriptor.partition_key));
    fields.insert("Archive Name".into(), json!(descriptor.destination_name));
    fields.insert("Archive ID".into(), json!(descriptor.destination_id));
    fields.insert("Workspace ID".into(), json!(descriptor.workspace_id));
    fields.insert("Link".into(), json!(descriptor.link));
    fields.insert(
        "Primary Table ID".into(),
        json!(descriptor.primary_collection_id),
    );
    fields
}

/// Rows missing a key or a destination id are unusable and dropped.
pub fn descriptor_from_fields(fields: &Map<String, Value>) -> Option<ArchiveDescriptor> {
    let partition_key = text(fields, "Archive Key");
    let destination_id = text(fields, "Archive ID");
    if partition_key.is_empty() || destination_id.is_empty() {
        return None;
    }
    Some(ArchiveDescriptor {
        partition_key,
        destination_name: text(fields, "Archive Name"),
        destination_id,
        workspace_id: text(fields, "Workspace ID"),
        link: text(fields, "Link"),
        primary_collection_id: text(fields, "Primary Table ID"),
    })
}

pub fn entry_fields(entry: &RunLogEntry) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("Run ID".into(), json!(entry.run_id));
    fields.insert("Timestamp".into(), json!(entry.timestamp));
    fields.insert("Status".into(), json!(entry.status.label()));
    fields.insert("Total Records Processed".into(), json!(entry.total_processed));
    fields.insert("Total Records Archived".into(), json!(entry.total_archived));
    fields.insert("Errors".into(), json!(entry.errors.join("\n")));
    fields.insert(
        "Execution Time (seconds)".into(),
        json!(entry.duration_seconds),
    );
    fields.insert("Frequency Used".into(), json!(entry.frequency_used));
    fields.insert(
        "Base IDs Created/Updated".into(),
        json!(entry.destinations_touched.join("\n")),
    );
    fields.insert(
        "Archived Periods".into(),
        json!(entry.periods_touched.join("\n")),
    );
    fields
}

pub fn entry_from_fields(fields: &Map<String, Value>) -> Option<RunLogEntry> {
    let run_id = text(fields, "Run ID");
    let status = RunStatus::from_label(&text(fields, "Status"))?;
    if run_id.is_empty() {
        return None;
    }
    Some(RunLogEntry {
        run_id,
        timestamp: text(fields, "Timestamp"),
        status,
        total_processed: number(fields, "Total Records Processed") as usize,
        total_archived: number(fields, "Total Records Archived") as usize,
        errors: lines(fields, "Errors"),
        duration_seconds: number(fields, "Execution Time (seconds)"),
        frequency_used: text(fields, "Frequency Used"),
        periods_touched: lines(fields, "Archived Periods"),
        destinations_touched: lines(fields, "Base IDs Created/Updated"),
    })
}

pub struct TableLedger<'a> {
    client: &'a ApiClient,
    base_id: String,
    table: String,
}

impl<'a> TableLedger<'a> {
    pub fn new(client: &'a ApiClient, base_id: &str, table: &str) -> Self {
        Self {
            client,
            base_id: base_id.to_string(),
            table: table.to_string(),
        }
    }
}

impl LedgerStore for TableLedger<'_> {
    fn ensure(&self) -> Result<()> {
        ensure_table(self.client, &self.base_id, &self.table, tracking_table_fields())?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<ArchiveDescriptor>> {
        let rows = rows_if_present(self.client, &self.base_id, &self.table)?;
        Ok(rows
            .iter()
            .filter_map(|r| descriptor_from_fields(&r.fields))
            .collect())
    }

    fn append(&self, descriptor: &ArchiveDescriptor) -> Result<()> {
        append_row(
            self.client,
            &self.base_id,
            &self.table,
            descriptor_fields(descriptor),
        )
    }
}

pub struct TableRunLog<'a> {
    client: &'a ApiClient,
    base_id: String,
    table: String,
}

impl<'a> TableRunLog<'a> {
    pub fn new(client: &'a ApiClient, base_id: &str, table: &str) -> Self {
        Self {
            client,
            base_id: base_id.to_string(),
            table: table.to_string(),
        }
    }
}

impl RunLogStore for TableRunLog<'_> {
    fn ensure(&self) -> Result<()> {
        ensure_table(self.client, &self.base_id, &self.table, log_table_fields())?;
        Ok(())
    }

    fn append(&self, entry: &RunLogEntry) -> Result<()> {
        append_row(self.client, &self.base_id, &self.table, entry_fields(entry))
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunLogEntry>> {
        let rows = rows_if_present(self.client, &self.base_id, &self.table)?;
        let mut entries = rows
            .iter()
            .filter_map(|r| entry_from_fields(&r.fields))
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}
