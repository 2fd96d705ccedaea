use std::env;
use std::path::PathBuf;

include!(concat!(env!("OUT_DIR"), "/archiver_env_allowlist.rs"));

const ENV_PREFIX: &str = "ARCHIVER_";

fn fallback_dotenv_path(
    archiver_home: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(home) = archiver_home {
        return Some(home.join(".env"));
    }
    Some(home_dir?.join("auto-archive/.env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("ARCHIVER_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

/// Splits the `ARCHIVER_*` variable names present in `names` into those the
/// binary reads and those it does not (usually typos).
pub fn partition_env_keys<I>(names: I) -> (Vec<String>, Vec<String>)
where
    I: IntoIterator<Item = String>,
{
    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for name in names {
        if !name.starts_with(ENV_PREFIX) {
            continue;
        }
        if GENERATED_ARCHIVER_ENV_ALLOWLIST.contains(&name.as_str()) {
            known.push(name);
        } else {
            unknown.push(name);
        }
    }
    known.sort();
    unknown.sort();
    (known, unknown)
}

pub fn archiver_env_keys() -> (Vec<String>, Vec<String>) {
    partition_env_keys(env::vars().map(|(k, _)| k))
}
