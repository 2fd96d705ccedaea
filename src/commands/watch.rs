use anyhow::Result;
use std::thread;
use std::time::Duration;

use crate::archive::config::ArchiverConfig;
use crate::archive::paths::resolve_paths;
use crate::archive::state;
use crate::archive::util::{now_epoch_secs, progress};
use crate::archive::warn::{self, WarnEvent};
use crate::commands::run::{self, RunOptions};
use crate::commands::{CommandReport, load_config_or_report};

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
}

enum Cycle {
    Ran(CommandReport),
    Skipped {
        due_in: u64,
        last_run_id: Option<String>,
    },
}

/// Seconds to sleep before the next check. A cycle that just ran waits a
/// full interval even if it failed, so failures do not spin.
pub fn next_sleep_secs(ran: bool, due_in: u64, interval_secs: u64) -> u64 {
    if ran { interval_secs } else { due_in.max(1) }
}

fn cycle(cfg: &ArchiverConfig) -> Result<Cycle> {
    let paths = resolve_paths()?;
    let current = state::load(&paths)?;
    let due_in = current.due_in(now_epoch_secs()?, cfg.schedule.interval_secs);
    if due_in > 0 {
        return Ok(Cycle::Skipped {
            due_in,
            last_run_id: current.last_run_id,
        });
    }
    Ok(Cycle::Ran(run::run(&RunOptions::default())?))
}

/// A cycle that could not finish is logged and recorded; the daemon keeps
/// its schedule.
fn settle(report: &mut CommandReport, outcome: Result<Cycle>) -> Option<Cycle> {
    match outcome {
        Ok(cycle) => Some(cycle),
        Err(err) => {
            let err = format!("{err:#}");
            warn::emit(WarnEvent {
                code: "WATCH_CYCLE_FAILED",
                stage: "watch",
                action: "cycle",
                partition: "",
                destination: "",
                retry: "next-interval",
                reason: "cycle-error",
                err: &err,
            });
            report.issue(format!("watch cycle failed: {err}"));
            None
        }
    }
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");

    loop {
        let Some(cfg) = load_config_or_report(&mut report) else {
            return Ok(report);
        };
        let interval = cfg.schedule.interval_secs;

        let sleep_for = match settle(&mut report, cycle(&cfg)) {
            Some(Cycle::Ran(result)) => {
                progress(&format!(
                    "watch cycle finished ok={} issues={}",
                    result.ok,
                    result.issues.len()
                ));
                if opts.once {
                    report.detail("cycle=ran");
                    report.merge(result);
                    return Ok(report);
                }
                next_sleep_secs(true, 0, interval)
            }
            Some(Cycle::Skipped {
                due_in,
                last_run_id,
            }) => {
                if opts.once {
                    report.detail("cycle=skipped");
                    report.detail(format!("next_due_in_secs={due_in}"));
                    if let Some(run_id) = last_run_id {
                        report.detail(format!("last_run_id={run_id}"));
                    }
                    return Ok(report);
                }
                next_sleep_secs(false, due_in, interval)
            }
            None => {
                if opts.once {
                    return Ok(report);
                }
                next_sleep_secs(true, 0, interval)
            }
        };

        progress(&format!("watch sleeping {sleep_for}s"));
        thread::sleep(Duration::from_secs(sleep_for));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn sleeps_full_interval_after_a_cycle() {
        assert_eq!(next_sleep_secs(true, 0, 3600), 3600);
    }

    #[test]
    fn sleeps_until_due_when_skipped() {
        assert_eq!(next_sleep_secs(false, 120, 3600), 120);
        assert_eq!(next_sleep_secs(false, 0, 3600), 1);
    }

    #[test]
    fn failed_cycle_is_recorded_not_propagated() {
        let mut report = CommandReport::new("watch");
        let outcome = settle(
            &mut report,
            Err(anyhow!("failed to parse state/archiver_state.json")),
        );
        assert!(outcome.is_none());
        assert!(!report.ok);
        assert_eq!(
            report.issues,
            vec!["watch cycle failed: failed to parse state/archiver_state.json".to_string()]
        );
    }

    #[test]
    fn successful_cycle_passes_through() {
        let mut report = CommandReport::new("watch");
        let outcome = settle(
            &mut report,
            Ok(Cycle::Skipped {
                due_in: 30,
                last_run_id: None,
            }),
        );
        assert!(matches!(outcome, Some(Cycle::Skipped { due_in: 30, .. })));
        assert!(report.ok);
    }
}
