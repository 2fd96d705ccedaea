use crate::airtable::client::ApiClient;
use crate::archive::migrate::COPY_BATCH_SIZE;
use crate::archive::store::{CollectionRequest, CreatedCollection, DestinationApi};
use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};

pub fn collection_body(request: &CollectionRequest<'_>) -> Value {
    json!({
        "name": request.name,
        "workspaceId": request.workspace_id,
        "tables": [{
            "name": request.table_name,
            "fields": request.fields,
        }],
    })
}

pub fn records_body(records: &[Map<String, Value>]) -> Value {
    let records = records
        .iter()
        .map(|fields| json!({ "fields": fields }))
        .collect::<Vec<_>>();
    json!({ "records": records })
}

/// Archive bases are created in a workspace through the meta API and then
/// filled through the records API.
pub struct AirtableDestinations<'a> {
    client: &'a ApiClient,
}

impl<'a> AirtableDestinations<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }
}

impl DestinationApi for AirtableDestinations<'_> {
    fn create_collection(&self, request: &CollectionRequest<'_>) -> Result<CreatedCollection> {
        let raw = self
            .client
            .create_json(&["v0", "meta", "bases"], &collection_body(request))?;
        let created: CreatedCollection = serde_json::from_value(raw)
            .with_context(|| format!("unexpected response creating base `{}`", request.name))?;
        if created.id.trim().is_empty() {
            bail!("base `{}` was created without an id", request.name);
        }
        Ok(created)
    }

    fn create_records(
        &self,
        collection_id: &str,
        table: &str,
        records: &[Map<String, Value>],
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        if records.len() > COPY_BATCH_SIZE {
            bail!(
                "create of {} records exceeds the per-call limit of {COPY_BATCH_SIZE}",
                records.len()
            );
        }
        let raw = self
            .client
            .post_json(&["v0", collection_id, table], &records_body(records))?;
        let created = raw
            .get("records")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(records.len());
        Ok(created)
    }
}
