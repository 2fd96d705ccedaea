use anyhow::{Result, anyhow};
use chrono::{DateTime, Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[serde(alias = "1m")]
    Monthly,
    #[serde(alias = "3m")]
    Quarterly,
    #[serde(alias = "6m", alias = "semi-yearly")]
    Semiannual,
    #[serde(alias = "12m", alias = "yearly")]
    Annual,
}

impl Frequency {
    pub fn label(self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Semiannual => "semiannual",
            Frequency::Annual => "annual",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Frequency {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monthly" | "1m" => Ok(Frequency::Monthly),
            "quarterly" | "3m" => Ok(Frequency::Quarterly),
            "semiannual" | "semi-yearly" | "6m" => Ok(Frequency::Semiannual),
            "annual" | "yearly" | "12m" => Ok(Frequency::Annual),
            other => Err(anyhow!(
                "unknown frequency `{other}`: use monthly, quarterly, semiannual or annual"
            )),
        }
    }
}

/// One archive period: the ledger key and the destination name built from it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey {
    pub key: String,
    pub display_name: String,
}

impl PeriodKey {
    pub fn from_key(key: String) -> Self {
        let display_name = format!("Archive {key}");
        Self { key, display_name }
    }
}

pub fn period_for(year: i32, month: u32, frequency: Frequency) -> PeriodKey {
    let key = match frequency {
        Frequency::Monthly => format!("{year}_{month:02}"),
        Frequency::Quarterly => format!("{year}_Q{}", month.div_ceil(3)),
        Frequency::Semiannual => {
            let half = if month <= 6 { "H1" } else { "H2" };
            format!("{year}_{half}")
        }
        Frequency::Annual => format!("{year}"),
    };
    PeriodKey::from_key(key)
}

pub fn resolve(date: NaiveDate, frequency: Frequency) -> PeriodKey {
    period_for(date.year(), date.month(), frequency)
}

/// Calendar date of a date-field value. Plain `YYYY-MM-DD` values are taken
/// as-is; timestamps are shifted into `tz` first. `None` for anything that
/// is not a usable date.
pub fn parse_record_date(value: &Value, tz: Tz) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
    Some(parsed.with_timezone(&tz).date_naive())
}
