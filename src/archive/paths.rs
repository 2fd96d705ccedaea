use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArchiverPaths {
    pub home: PathBuf,
    pub logs_dir: PathBuf,
    pub state_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub runs_file: PathBuf,
}

impl ArchiverPaths {
    /// Default layout rooted at `home`, without env overrides.
    pub fn under(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            logs_dir: home.join("logs"),
            state_dir: home.join("state"),
            ledger_file: home.join("ledger.jsonl"),
            runs_file: home.join("runs.jsonl"),
        }
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<ArchiverPaths> {
    let archiver_home = match env::var("ARCHIVER_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join("auto-archive"),
    };
    let defaults = ArchiverPaths::under(&archiver_home);

    Ok(ArchiverPaths {
        logs_dir: env_or_default_path("ARCHIVER_LOGS_DIR", defaults.logs_dir),
        state_dir: env_or_default_path("ARCHIVER_STATE_DIR", defaults.state_dir),
        ledger_file: env_or_default_path("ARCHIVER_LEDGER_FILE", defaults.ledger_file),
        runs_file: env_or_default_path("ARCHIVER_RUNS_FILE", defaults.runs_file),
        home: archiver_home,
    })
}
