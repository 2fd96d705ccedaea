use crate::airtable::client::ApiClient;
use crate::archive::migrate::FLAG_UPDATE_CHUNK;
use crate::archive::schema::FieldDefinition;
use crate::archive::store::{RecordUpdate, SourceRecord, SourceStore};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Deserialize)]
pub struct TableMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Deserialize)]
struct TablesResponse {
    #[serde(default)]
    tables: Vec<TableMeta>,
}

/// Every table of `base_id` with its field definitions.
pub fn list_tables(client: &ApiClient, base_id: &str) -> Result<Vec<TableMeta>> {
    let raw = client.get_json(&["v0", "meta", "bases", base_id, "tables"], &[])?;
    let parsed: TablesResponse = serde_json::from_value(raw)
        .with_context(|| format!("unexpected table listing for base {base_id}"))?;
    Ok(parsed.tables)
}

/// Tables are addressed by name or id interchangeably.
pub fn find_table<'t>(tables: &'t [TableMeta], name_or_id: &str) -> Option<&'t TableMeta> {
    tables
        .iter()
        .find(|t| t.id == name_or_id || t.name == name_or_id)
}

pub fn flag_field_request(name: &str) -> Value {
    json!({
        "name": name,
        "type": "checkbox",
        "options": {"color": "greenBright", "icon": "check"},
    })
}

pub struct AirtableSource<'a> {
    client: &'a ApiClient,
    base_id: String,
    table: String,
}

impl<'a> AirtableSource<'a> {
    pub fn new(client: &'a ApiClient, base_id: &str, table: &str) -> Self {
        Self {
            client,
            base_id: base_id.to_string(),
            table: table.to_string(),
        }
    }

    fn table_meta(&self) -> Result<TableMeta> {
        let tables = list_tables(self.client, &self.base_id)?;
        match find_table(&tables, &self.table) {
            Some(meta) => Ok(meta.clone()),
            None => bail!("table `{}` not found in base {}", self.table, self.base_id),
        }
    }
}

impl SourceStore for AirtableSource<'_> {
    fn list_fields(&self) -> Result<Vec<FieldDefinition>> {
        Ok(self.table_meta()?.fields)
    }

    fn list_records(&self, keep: &dyn Fn(&SourceRecord) -> bool) -> Result<Vec<SourceRecord>> {
        let all = self.client.list_all_records(&self.base_id, &self.table)?;
        Ok(all.into_iter().filter(|r| keep(r)).collect())
    }

    fn ensure_flag_field(&self, name: &str) -> Result<bool> {
        let meta = self.table_meta()?;
        if meta.fields.iter().any(|f| f.name == name) {
            return Ok(false);
        }
        self.client
            .create_json(
                &["v0", "meta", "bases", &self.base_id, "tables", &meta.id, "fields"],
                &flag_field_request(name),
            )
            .with_context(|| format!("failed to create field `{name}` on {}", meta.name))?;
        Ok(true)
    }

    fn update_records(&self, updates: &[RecordUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        if updates.len() > FLAG_UPDATE_CHUNK {
            bail!(
                "update of {} records exceeds the per-call limit of {FLAG_UPDATE_CHUNK}",
                updates.len()
            );
        }
        let body = json!({ "records": updates });
        self.client
            .patch_json(&["v0", &self.base_id, &self.table], &body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Vec<TableMeta> {
        serde_json::from_value::<TablesResponse>(json!({
            "tables": [
                {
                    "id": "tblOrders",
                    "name": "Orders",
                    "primaryFieldId": "fldName",
                    "fields": [
                        {"id": "fldName", "name": "Name", "type": "singleLineText"},
                        {"id": "fldStatus", "name": "Status", "type": "singleSelect",
                         "options": {"choices": [{"id": "sel1", "name": "Open", "color": "blueLight2"}]}}
                    ]
                },
                {"id": "tblTracking", "name": "Archive Base Tracking", "fields": []}
            ]
        }))
        .expect("tables")
        .tables
    }

    #[test]
    fn find_table_matches_name_or_id() {
        let tables = tables();
        assert_eq!(find_table(&tables, "Orders").map(|t| t.id.as_str()), Some("tblOrders"));
        assert_eq!(
            find_table(&tables, "tblTracking").map(|t| t.name.as_str()),
            Some("Archive Base Tracking")
        );
        assert!(find_table(&tables, "Invoices").is_none());
    }

    #[test]
    fn table_meta_keeps_field_options() {
        let tables = tables();
        let status = &tables[0].fields[1];
        assert_eq!(status.field_type, "singleSelect");
        assert_eq!(status.id.as_deref(), Some("fldStatus"));
        assert!(status.options.is_some());
    }

    #[test]
    fn flag_field_is_a_green_checkbox() {
        assert_eq!(
            flag_field_request("Archived"),
            json!({"name": "Archived", "type": "checkbox",
                   "options": {"color": "greenBright", "icon": "check"}})
        );
    }
}
