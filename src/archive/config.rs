use crate::archive::period::Frequency;
use anyhow::{Result, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_id: String,
    pub table: String,
    #[serde(default = "default_date_field")]
    pub date_field: String,
    #[serde(default = "default_flag_field")]
    pub flag_field: String,
}

fn default_date_field() -> String {
    "Date".to_string()
}

fn default_flag_field() -> String {
    "Archived".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_id: String::new(),
            table: String::new(),
            date_field: default_date_field(),
            flag_field: default_flag_field(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    pub link_base: String,
    pub timeout_secs: u64,
    pub retries: u64,
    pub min_interval_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.airtable.com".to_string(),
            link_base: "https://airtable.com".to_string(),
            timeout_secs: 30,
            retries: 2,
            min_interval_ms: 220,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    pub frequency: Frequency,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            frequency: Frequency::Monthly,
            workspace_id: String::new(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Tracking and log tables inside the source base.
    Table,
    /// JSONL files under the archiver home.
    File,
}

impl StoreBackend {
    pub fn label(self) -> &'static str {
        match self {
            StoreBackend::Table => "table",
            StoreBackend::File => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: StoreBackend,
    pub tracking_table: String,
    pub log_table: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Table,
            tracking_table: "Archive Base Tracking".to_string(),
            log_table: "Archive Process Logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArchiverConfig {
    pub source: SourceConfig,
    pub api: ApiConfig,
    pub archive: ArchiveSettings,
    pub ledger: LedgerConfig,
    pub schedule: ScheduleConfig,
}

impl ArchiverConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.archive
            .timezone
            .trim()
            .parse::<Tz>()
            .map_err(|err| anyhow!("invalid timezone `{}`: {err}", self.archive.timezone))
    }

    /// Writes need a credential; read-only commands do not.
    pub fn require_api_key(&self) -> Result<&str> {
        let key = self.api.api_key.trim();
        if key.is_empty() {
            return Err(anyhow!(
                "missing API credential: set ARCHIVER_API_KEY or api.api_key"
            ));
        }
        Ok(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialArchiverConfig {
    source: Option<SourceConfig>,
    api: Option<ApiConfig>,
    archive: Option<ArchiveSettings>,
    ledger: Option<LedgerConfig>,
    schedule: Option<ScheduleConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_frequency(var: &str, fallback: Frequency) -> Result<Frequency> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.parse::<Frequency>(),
        _ => Ok(fallback),
    }
}

fn env_backend(var: &str, fallback: StoreBackend) -> Result<StoreBackend> {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "" => Ok(fallback),
            "table" => Ok(StoreBackend::Table),
            "file" => Ok(StoreBackend::File),
            other => Err(anyhow!("invalid store backend `{other}`: use `table` or `file`")),
        },
        Err(_) => Ok(fallback),
    }
}

pub fn validate(cfg: &ArchiverConfig) -> Result<()> {
    if cfg.source.base_id.trim().is_empty() {
        return Err(anyhow!("invalid source: base id cannot be empty"));
    }
    if cfg.source.table.trim().is_empty() {
        return Err(anyhow!("invalid source: table cannot be empty"));
    }
    if cfg.source.date_field.trim().is_empty() {
        return Err(anyhow!("invalid source: date field cannot be empty"));
    }
    if cfg.source.flag_field.trim().is_empty() {
        return Err(anyhow!("invalid source: flag field cannot be empty"));
    }
    if cfg.source.date_field == cfg.source.flag_field {
        return Err(anyhow!(
            "invalid source: date field and flag field must differ"
        ));
    }
    if cfg.archive.workspace_id.trim().is_empty() {
        return Err(anyhow!("invalid archive: workspace id cannot be empty"));
    }
    cfg.timezone()?;
    if cfg.api.timeout_secs == 0 {
        return Err(anyhow!("invalid api timeout: must be >= 1 second"));
    }
    if cfg.api.base_url.trim().is_empty() {
        return Err(anyhow!("invalid api base url: cannot be empty"));
    }
    if cfg.schedule.interval_secs < 60 {
        return Err(anyhow!("invalid schedule interval: must be >= 60 seconds"));
    }
    if cfg.ledger.backend == StoreBackend::Table
        && (cfg.ledger.tracking_table.trim().is_empty() || cfg.ledger.log_table.trim().is_empty())
    {
        return Err(anyhow!(
            "invalid ledger: tracking and log table names cannot be empty"
        ));
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("ARCHIVER_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".auto-archive").join("config.toml"))
}

fn merge_file_config(base: &mut ArchiverConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialArchiverConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse archiver config {}: {err}", path.display()))?;
    if let Some(source) = parsed.source {
        base.source = source;
    }
    if let Some(api) = parsed.api {
        base.api = api;
    }
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(ledger) = parsed.ledger {
        base.ledger = ledger;
    }
    if let Some(schedule) = parsed.schedule {
        base.schedule = schedule;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut ArchiverConfig) -> Result<()> {
    cfg.source.base_id = env_or_string("ARCHIVER_SOURCE_BASE_ID", &cfg.source.base_id);
    cfg.source.table = env_or_string("ARCHIVER_SOURCE_TABLE", &cfg.source.table);
    cfg.source.date_field = env_or_string("ARCHIVER_DATE_FIELD", &cfg.source.date_field);
    cfg.source.flag_field = env_or_string("ARCHIVER_FLAG_FIELD", &cfg.source.flag_field);
    cfg.api.api_key = env_or_string("ARCHIVER_API_KEY", &cfg.api.api_key);
    cfg.api.base_url = env_or_string("ARCHIVER_API_BASE_URL", &cfg.api.base_url);
    cfg.api.link_base = env_or_string("ARCHIVER_LINK_BASE", &cfg.api.link_base);
    cfg.api.timeout_secs = env_or_u64("ARCHIVER_API_TIMEOUT_SECS", cfg.api.timeout_secs);
    cfg.api.retries = env_or_u64("ARCHIVER_API_RETRIES", cfg.api.retries);
    cfg.api.min_interval_ms = env_or_u64("ARCHIVER_API_MIN_INTERVAL_MS", cfg.api.min_interval_ms);
    cfg.archive.frequency = env_frequency("ARCHIVER_FREQUENCY", cfg.archive.frequency)?;
    cfg.archive.workspace_id = env_or_string("ARCHIVER_WORKSPACE_ID", &cfg.archive.workspace_id);
    cfg.archive.timezone = env_or_string("ARCHIVER_TIMEZONE", &cfg.archive.timezone);
    cfg.ledger.backend = env_backend("ARCHIVER_LEDGER_BACKEND", cfg.ledger.backend)?;
    cfg.schedule.interval_secs =
        env_or_u64("ARCHIVER_SCHEDULE_INTERVAL_SECS", cfg.schedule.interval_secs);
    Ok(())
}

pub fn load_config() -> Result<ArchiverConfig> {
    let mut cfg = ArchiverConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ArchiverConfig {
        let mut cfg = ArchiverConfig::default();
        cfg.source.base_id = "appSource".into();
        cfg.source.table = "Orders".into();
        cfg.archive.workspace_id = "wspArchive".into();
        cfg
    }

    #[test]
    fn defaults_need_a_source_and_workspace() {
        assert!(validate(&ArchiverConfig::default()).is_err());
        assert!(validate(&valid()).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let mut cfg = valid();
        cfg.archive.timezone = "Mars/Olympus".into();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_same_date_and_flag_field() {
        let mut cfg = valid();
        cfg.source.flag_field = "Date".into();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_short_schedule() {
        let mut cfg = valid();
        cfg.schedule.interval_secs = 5;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn toml_sections_parse_with_short_frequency_codes() {
        let raw = r#"
[source]
base_id = "appSource"
table = "Orders"

[archive]
frequency = "3m"
workspace_id = "wspArchive"

[ledger]
backend = "file"
"#;
        let parsed: PartialArchiverConfig = toml::from_str(raw).expect("parse");
        let archive = parsed.archive.expect("archive section");
        assert_eq!(archive.frequency, Frequency::Quarterly);
        assert_eq!(archive.timezone, "UTC");
        let source = parsed.source.expect("source section");
        assert_eq!(source.date_field, "Date");
        assert_eq!(source.flag_field, "Archived");
        assert_eq!(parsed.ledger.expect("ledger").backend, StoreBackend::File);
        assert!(parsed.api.is_none());
    }

    #[test]
    fn require_api_key_rejects_blank() {
        let mut cfg = valid();
        assert!(cfg.require_api_key().is_err());
        cfg.api.api_key = "  patKey ".into();
        assert_eq!(cfg.require_api_key().expect("key"), "patKey");
    }
}
