use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "auto-archive",
    version,
    about = "Move aging records out of a table into period-scoped archive bases"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// One archive pass over the source table.
    Run {
        /// Partition and plan without creating or copying anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run on the configured schedule.
    Watch {
        /// Run at most one cycle, skipping it if the last success is recent.
        #[arg(long)]
        once: bool,
    },
    /// Resolved config, paths, last run and environment.
    Status,
    /// Archive destinations recorded so far.
    Ledger,
    /// Most recent run log entries.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn render_text(report: &CommandReport) -> String {
    let mut out = format!(
        "{}: {}\n",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for detail in &report.details {
        out.push_str(&format!("  {detail}\n"));
    }
    for issue in &report.issues {
        out.push_str(&format!("  issue: {issue}\n"));
    }
    out
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Run { dry_run } => commands::run::run(&commands::run::RunOptions { dry_run })?,
        Command::Watch { once } => commands::watch::run(&commands::watch::WatchOptions { once })?,
        Command::Status => commands::status::run()?,
        Command::Ledger => commands::ledger::run()?,
        Command::History { limit } => commands::history::run(limit)?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text(&report));
    }

    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}
