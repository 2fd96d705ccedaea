use anyhow::Result;

use crate::airtable::ApiClient;
use crate::archive::paths::resolve_paths;
use crate::commands::{CommandReport, load_config_or_report, needs_client, run_log_store};

pub fn run(limit: usize) -> Result<CommandReport> {
    let mut report = CommandReport::new("history");
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
    let store = run_log_store(&cfg, &paths, client.as_ref())?;

    match store.recent(limit) {
        Ok(entries) => {
            report.detail(format!("runs={}", entries.len()));
            for entry in entries {
                report.detail(format!(
                    "run_id={} at={} status={} processed={} archived={} errors={} secs={:.3}",
                    entry.run_id,
                    entry.timestamp,
                    entry.status.label(),
                    entry.total_processed,
                    entry.total_archived,
                    entry.errors.len(),
                    entry.duration_seconds
                ));
            }
        }
        Err(err) => report.issue(format!("run log unreadable: {err:#}")),
    }
    Ok(report)
}
