//! Collaborator seams. The engine only talks to these traits; `airtable`
//! implements them over HTTP, `journal` implements the ledger and run log
//! over local JSONL files.

use crate::archive::registry::ArchiveDescriptor;
use crate::archive::report::RunLogEntry;
use crate::archive::schema::{FieldDefinition, FieldSchema};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl SourceRecord {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// Unset, null, `false`, `0` and `""` all count as not migrated.
    pub fn is_flagged(&self, flag_field: &str) -> bool {
        match self.field(flag_field) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct CollectionRequest<'a> {
    pub name: &'a str,
    pub table_name: &'a str,
    pub fields: &'a [FieldSchema],
    pub workspace_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedTable {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedCollection {
    pub id: String,
    #[serde(default)]
    pub tables: Vec<CreatedTable>,
}

pub trait SourceStore {
    fn list_fields(&self) -> Result<Vec<FieldDefinition>>;
    fn list_records(&self, keep: &dyn Fn(&SourceRecord) -> bool) -> Result<Vec<SourceRecord>>;
    /// Create the checkbox flag field if the table lacks it. Returns `true`
    /// when it had to be created.
    fn ensure_flag_field(&self, name: &str) -> Result<bool>;
    /// One call; callers keep `updates` at or below the API ceiling.
    fn update_records(&self, updates: &[RecordUpdate]) -> Result<()>;
}

pub trait DestinationApi {
    fn create_collection(&self, request: &CollectionRequest<'_>) -> Result<CreatedCollection>;
    fn create_records(
        &self,
        collection_id: &str,
        table: &str,
        records: &[Map<String, Value>],
    ) -> Result<usize>;
}

pub trait LedgerStore {
    fn ensure(&self) -> Result<()>;
    fn load_all(&self) -> Result<Vec<ArchiveDescriptor>>;
    fn append(&self, descriptor: &ArchiveDescriptor) -> Result<()>;
}

pub trait RunLogStore {
    fn ensure(&self) -> Result<()>;
    fn append(&self, entry: &RunLogEntry) -> Result<()>;
    fn recent(&self, limit: usize) -> Result<Vec<RunLogEntry>>;
}
