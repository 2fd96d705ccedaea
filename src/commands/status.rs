use anyhow::Result;

use crate::archive::config::resolve_config_path;
use crate::archive::lock;
use crate::archive::paths::resolve_paths;
use crate::archive::state;
use crate::archive::util::redact_secret;
use crate::commands::{CommandReport, load_config_or_report};
use crate::env_loader::archiver_env_keys;

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    report.detail(format!("build_uuid={}", env!("BUILD_UUID")));

    let (known, unknown) = archiver_env_keys();
    report.detail(format!("env.recognized={}", known.join(",")));
    for name in unknown {
        report.issue(format!("env.unknown={name} (not read by auto-archive)"));
    }

    match resolve_config_path() {
        Some(path) if path.exists() => report.detail(format!("config_file={}", path.display())),
        Some(path) => report.detail(format!("config_file={} (missing, env only)", path.display())),
        None => report.detail("config_file=unresolved"),
    }

    let paths = resolve_paths()?;
    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));

    let Some(cfg) = load_config_or_report(&mut report) else {
        return Ok(report);
    };
    report.detail(format!(
        "source={}/{}",
        cfg.source.base_id, cfg.source.table
    ));
    report.detail(format!("date_field={}", cfg.source.date_field));
    report.detail(format!("flag_field={}", cfg.source.flag_field));
    report.detail(format!("frequency={}", cfg.archive.frequency));
    report.detail(format!("workspace_id={}", cfg.archive.workspace_id));
    report.detail(format!("timezone={}", cfg.archive.timezone));
    report.detail(format!("api.base_url={}", cfg.api.base_url));
    if cfg.api.api_key.trim().is_empty() {
        report.detail("api.key=missing");
    } else {
        report.detail(format!("api.key={}", redact_secret(cfg.api.api_key.trim())));
    }
    report.detail(format!("ledger.backend={}", cfg.ledger.backend.label()));
    report.detail(format!("schedule.interval_secs={}", cfg.schedule.interval_secs));

    let lock_file = lock::lock_path(&paths, &cfg.source.base_id, &cfg.source.table);
    match lock::read_payload(&lock_file) {
        Ok(Some(payload)) => report.detail(format!(
            "lock.last_holder_pid={} started_at={} build={}",
            payload.pid, payload.started_at_epoch_secs, payload.build_uuid
        )),
        Ok(None) => report.detail("lock=never-taken"),
        Err(err) => report.issue(format!("lock file unreadable: {err:#}")),
    }

    match state::load(&paths) {
        Ok(st) => {
            report.detail(format!(
                "last_run_id={}",
                st.last_run_id.as_deref().unwrap_or("none")
            ));
            report.detail(format!(
                "last_status={}",
                st.last_status.as_deref().unwrap_or("none")
            ));
            if let Some(at) = st.last_success_epoch_secs {
                report.detail(format!("last_success_epoch_secs={at}"));
            }
        }
        Err(err) => report.issue(format!("state unreadable: {err:#}")),
    }

    Ok(report)
}
