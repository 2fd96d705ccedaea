use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

pub fn now_epoch_millis() -> Result<u128> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis())
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

/// Keep the first and last four characters of a credential.
pub fn redact_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 8 {
        return "*".repeat(count);
    }
    let head: String = secret.chars().take(4).collect();
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{head}…{tail}")
}

pub fn verbose_enabled() -> bool {
    matches!(
        std::env::var("ARCHIVER_VERBOSE").as_deref().map(str::trim),
        Ok("1" | "true" | "TRUE" | "yes" | "on")
    )
}

/// Progress line on stderr, only when `ARCHIVER_VERBOSE` is set.
pub fn progress(message: &str) {
    if verbose_enabled() {
        eprintln!("auto-archive: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_with_ellipsis_strips_controls() {
        assert_eq!(truncate_with_ellipsis("ab\ncd", 10), "abcd");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
    }

    #[test]
    fn redact_secret_keeps_edges() {
        assert_eq!(redact_secret("patABCDEFGH1234"), "patA…1234");
        assert_eq!(redact_secret("short"), "*****");
    }
}
