use anyhow::Result;

use crate::airtable::ApiClient;
use crate::archive::paths::resolve_paths;
use crate::commands::{CommandReport, ledger_store, load_config_or_report, needs_client};

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("ledger");
    let Some(cfg) = load_config_or_report(&mut report) else {
        return Ok(report);
    };
    let paths = resolve_paths()?;

    let client = if needs_client(&cfg) {
        cfg.require_api_key()?;
        Some(ApiClient::new(&cfg.api)?)
    } else {
        None
    };
    let store = ledger_store(&cfg, &paths, client.as_ref())?;

    match store.load_all() {
        Ok(rows) => {
            report.detail(format!("destinations={}", rows.len()));
            for row in rows {
                report.detail(format!(
                    "partition={} name=\"{}\" id={} table={} link={}",
                    row.partition_key,
                    row.destination_name,
                    row.destination_id,
                    if row.primary_collection_id.is_empty() {
                        "-"
                    } else {
                        row.primary_collection_id.as_str()
                    },
                    row.link
                ));
            }
        }
        Err(err) => report.issue(format!("ledger unreadable: {err:#}")),
    }
    Ok(report)
}
