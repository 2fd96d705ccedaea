//! In-memory collaborators for engine tests.

use crate::archive::registry::ArchiveDescriptor;
use crate::archive::report::RunLogEntry;
use crate::archive::schema::{FieldDefinition, FieldSchema};
use crate::archive::store::{
    CollectionRequest, CreatedCollection, CreatedTable, DestinationApi, LedgerStore,
    RecordUpdate, RunLogStore, SourceRecord, SourceStore,
};
use anyhow::{Result, bail};
use serde_json::{Map, Value, json};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
pub struct MemorySource {
    pub fields: RefCell<Vec<FieldDefinition>>,
    pub records: RefCell<Vec<SourceRecord>>,
    pub update_calls: RefCell<Vec<usize>>,
    pub fail_list: Cell<bool>,
    pub fail_updates: Cell<bool>,
}

impl MemorySource {
    pub fn with_records(fields: Vec<FieldDefinition>, records: Vec<SourceRecord>) -> Self {
        Self {
            fields: RefCell::new(fields),
            records: RefCell::new(records),
            ..Self::default()
        }
    }

    pub fn flagged_ids(&self, flag_field: &str) -> BTreeSet<String> {
        self.records
            .borrow()
            .iter()
            .filter(|r| r.is_flagged(flag_field))
            .map(|r| r.id.clone())
            .collect()
    }
}

impl SourceStore for MemorySource {
    fn list_fields(&self) -> Result<Vec<FieldDefinition>> {
        Ok(self.fields.borrow().clone())
    }

    fn list_records(&self, keep: &dyn Fn(&SourceRecord) -> bool) -> Result<Vec<SourceRecord>> {
        if self.fail_list.get() {
            bail!("list records failed with status 503 Service Unavailable");
        }
        Ok(self
            .records
            .borrow()
            .iter()
            .filter(|r| keep(r))
            .cloned()
            .collect())
    }

    fn ensure_flag_field(&self, name: &str) -> Result<bool> {
        let mut fields = self.fields.borrow_mut();
        if fields.iter().any(|f| f.name == name) {
            return Ok(false);
        }
        fields.push(FieldDefinition {
            id: Some(format!("fld{name}")),
            name: name.to_string(),
            field_type: "checkbox".to_string(),
            description: None,
            options: Some(json!({"color": "greenBright", "icon": "check"})),
        });
        Ok(true)
    }

    fn update_records(&self, updates: &[RecordUpdate]) -> Result<()> {
        self.update_calls.borrow_mut().push(updates.len());
        if self.fail_updates.get() {
            bail!("update failed with status 429 Too Many Requests");
        }
        let mut records = self.records.borrow_mut();
        for update in updates {
            if let Some(record) = records.iter_mut().find(|r| r.id == update.id) {
                for (k, v) in &update.fields {
                    record.fields.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDestinations {
    pub collections: RefCell<BTreeMap<String, Vec<Map<String, Value>>>>,
    pub schemas: RefCell<BTreeMap<String, Vec<FieldSchema>>>,
    pub names: RefCell<Vec<String>>,
    pub create_record_calls: RefCell<Vec<usize>>,
    pub fail_collection_names: RefCell<BTreeSet<String>>,
    /// 0-based indices of `create_records` calls that should fail.
    pub fail_record_calls: RefCell<BTreeSet<usize>>,
    next_id: Cell<u32>,
}

impl MemoryDestinations {
    pub fn fail_collection(&self, name: &str) {
        self.fail_collection_names
            .borrow_mut()
            .insert(name.to_string());
    }

    pub fn records_in(&self, collection_id: &str) -> Vec<Map<String, Value>> {
        self.collections
            .borrow()
            .get(collection_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl DestinationApi for MemoryDestinations {
    fn create_collection(&self, request: &CollectionRequest<'_>) -> Result<CreatedCollection> {
        if self.fail_collection_names.borrow().contains(request.name) {
            bail!("create base failed with status 422 Unprocessable Entity");
        }
        let n = self.next_id.get() + 1;
        self.next_id.set(n);
        let id = format!("appArchive{n}");
        self.collections.borrow_mut().insert(id.clone(), Vec::new());
        self.schemas
            .borrow_mut()
            .insert(id.clone(), request.fields.to_vec());
        self.names.borrow_mut().push(request.name.to_string());
        Ok(CreatedCollection {
            id,
            tables: vec![CreatedTable {
                id: format!("tblArchive{n}"),
                name: request.table_name.to_string(),
            }],
        })
    }

    fn create_records(
        &self,
        collection_id: &str,
        _table: &str,
        records: &[Map<String, Value>],
    ) -> Result<usize> {
        let call = self.create_record_calls.borrow().len();
        self.create_record_calls.borrow_mut().push(records.len());
        if self.fail_record_calls.borrow().contains(&call) {
            bail!("create records failed with status 500 Internal Server Error");
        }
        let mut collections = self.collections.borrow_mut();
        let Some(rows) = collections.get_mut(collection_id) else {
            bail!("unknown base {collection_id}");
        };
        rows.extend(records.iter().cloned());
        Ok(records.len())
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    pub rows: RefCell<Vec<ArchiveDescriptor>>,
    pub fail_append: Cell<bool>,
    pub fail_load: Cell<bool>,
}

impl LedgerStore for MemoryLedger {
    fn ensure(&self) -> Result<()> {
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<ArchiveDescriptor>> {
        if self.fail_load.get() {
            bail!("tracking table unreadable");
        }
        Ok(self.rows.borrow().clone())
    }

    fn append(&self, descriptor: &ArchiveDescriptor) -> Result<()> {
        if self.fail_append.get() {
            bail!("tracking table write failed");
        }
        self.rows.borrow_mut().push(descriptor.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRunLog {
    rows: RefCell<Vec<RunLogEntry>>,
}

impl MemoryRunLog {
    pub fn entries(&self) -> Vec<RunLogEntry> {
        self.rows.borrow().clone()
    }
}

impl RunLogStore for MemoryRunLog {
    fn ensure(&self) -> Result<()> {
        Ok(())
    }

    fn append(&self, entry: &RunLogEntry) -> Result<()> {
        self.rows.borrow_mut().push(entry.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunLogEntry>> {
        let rows = self.rows.borrow();
        let skip = rows.len().saturating_sub(limit);
        Ok(rows[skip..].to_vec())
    }
}

pub fn field(name: &str, field_type: &str) -> FieldDefinition {
    FieldDefinition {
        id: Some(format!("fld{name}")),
        name: name.to_string(),
        field_type: field_type.to_string(),
        description: None,
        options: None,
    }
}

pub fn dated_record(id: &str, date: &str, extra: Value) -> SourceRecord {
    let mut fields = extra.as_object().cloned().unwrap_or_default();
    fields.insert("Date".to_string(), Value::String(date.to_string()));
    SourceRecord {
        id: id.to_string(),
        fields,
    }
}
