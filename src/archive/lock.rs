use crate::archive::paths::ArchiverPaths;
use crate::archive::util::now_epoch_secs;
use crate::error::ArchiveError;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Written into the lock file so `status` can tell who holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPayload {
    pub pid: u32,
    pub build_uuid: String,
    pub started_at_epoch_secs: u64,
    pub source: String,
}

/// Held for the whole run; the OS releases the lock when this drops.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn lock_key(base_id: &str, table: &str) -> String {
    let digest = Sha256::digest(format!("{base_id}/{table}").as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub fn lock_path(paths: &ArchiverPaths, base_id: &str, table: &str) -> PathBuf {
    paths
        .lock_dir()
        .join(format!("run-{}.lock", lock_key(base_id, table)))
}

pub fn read_payload(path: &Path) -> Result<Option<LockPayload>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let payload = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(payload))
}

/// Take the per-source run lock or fail fast with [`ArchiveError::Locked`].
pub fn acquire(paths: &ArchiverPaths, base_id: &str, table: &str) -> Result<RunLock> {
    let dir = paths.lock_dir();
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = lock_path(paths, base_id, table);
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    if file.try_lock_exclusive().is_err() {
        let holder = read_payload(&path)
            .ok()
            .flatten()
            .map(|p| format!("pid {} since {}", p.pid, p.started_at_epoch_secs))
            .unwrap_or_else(|| "unknown holder".to_string());
        return Err(ArchiveError::Locked(format!("{base_id}/{table} ({holder})")).into());
    }

    let payload = LockPayload {
        pid: std::process::id(),
        build_uuid: env!("BUILD_UUID").to_string(),
        started_at_epoch_secs: now_epoch_secs()?,
        source: format!("{base_id}/{table}"),
    };
    file.set_len(0)
        .with_context(|| format!("failed to truncate {}", path.display()))?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serde_json::to_string(&payload)?.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.flush()?;

    Ok(RunLock { file, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_source_specific() {
        assert_eq!(lock_key("appA", "Orders"), lock_key("appA", "Orders"));
        assert_ne!(lock_key("appA", "Orders"), lock_key("appA", "Invoices"));
        assert_eq!(lock_key("appA", "Orders").len(), 16);
    }

    #[test]
    fn second_acquire_fails_until_first_drops() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = ArchiverPaths::under(tmp.path());

        let first = acquire(&paths, "appA", "Orders").expect("first lock");
        let payload = read_payload(first.path()).expect("read").expect("payload");
        assert_eq!(payload.pid, std::process::id());
        assert_eq!(payload.source, "appA/Orders");

        let err = acquire(&paths, "appA", "Orders").expect_err("second lock must fail");
        let archive_err = err.downcast_ref::<ArchiveError>().expect("archive error");
        assert_eq!(archive_err.code().as_str(), "E001_LOCKED");

        let other = acquire(&paths, "appA", "Invoices");
        assert!(other.is_ok());

        drop(first);
        assert!(acquire(&paths, "appA", "Orders").is_ok());
    }
}
