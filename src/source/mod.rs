//! Record Sources
//!
//! Machine inventory records and the collaborators that supply them:
//! - Built-in sample fleet
//! - Randomized fleet generator
//! - JSON and CSV files

mod file;
mod generator;
mod sample;

pub use file::{CsvFileSource, JsonFileSource};
pub use generator::GeneratedSource;
pub use sample::{sample_records, SampleSource};

use crate::config::{SourceConfig, SourceKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// One machine in the inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub computer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_free_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_score: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_reboot: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A single cell read from a record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(f64),
    Date(NaiveDate),
    Null,
}

impl FieldValue<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text form used for string comparisons and group keys
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Self::Null => None,
        }
    }
}

fn text(value: &Option<String>) -> FieldValue<'_> {
    value
        .as_deref()
        .map(FieldValue::Text)
        .unwrap_or(FieldValue::Null)
}

fn number(value: Option<f64>) -> FieldValue<'static> {
    value.map(FieldValue::Number).unwrap_or(FieldValue::Null)
}

fn date(value: Option<NaiveDate>) -> FieldValue<'static> {
    value.map(FieldValue::Date).unwrap_or(FieldValue::Null)
}

impl MachineRecord {
    /// Create a record with only a computer name set
    pub fn named(computer_name: impl Into<String>) -> Self {
        Self {
            computer_name: computer_name.into(),
            ..Default::default()
        }
    }

    /// Read a storage column. Unknown columns read as null.
    pub fn value(&self, column: &str) -> FieldValue<'_> {
        match column {
            "id" => text(&self.id),
            "computer_name" => FieldValue::Text(&self.computer_name),
            "role" => text(&self.role),
            "os_platform" => text(&self.os_platform),
            "os_version" => text(&self.os_version),
            "group_name" => text(&self.group_name),
            "location" => text(&self.location),
            "disk_free_gb" => number(self.disk_free_gb),
            "memory_gb" => number(self.memory_gb),
            "cpu_percent" => number(self.cpu_percent),
            "compliance_score" => number(self.compliance_score),
            "last_reboot" => date(self.last_reboot),
            "last_seen" => date(self.last_seen),
            "ip_address" => text(&self.ip_address),
            "mac_address" => text(&self.mac_address),
            "serial_number" => text(&self.serial_number),
            "manufacturer" => text(&self.manufacturer),
            "model" => text(&self.model),
            _ => FieldValue::Null,
        }
    }
}

/// Accept `YYYY-MM-DD` as well as full timestamps, keeping only the date
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    let Some(raw) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let date_part = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| serde::de::Error::custom(format!("invalid date '{}': {}", raw, e)))
}

/// Errors that can occur while loading records
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unsupported source: {0}")]
    Unsupported(String),
}

/// Common trait for all record sources
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Load every record the source provides
    async fn load(&self) -> Result<Vec<MachineRecord>, SourceError>;
}

/// Build the source described by a configuration
pub fn source_for(config: &SourceConfig) -> Result<Box<dyn RecordSource>, SourceError> {
    let require_path = || {
        config.path.clone().ok_or_else(|| {
            SourceError::Unsupported(format!("{} source requires a path", config.kind))
        })
    };

    Ok(match config.kind {
        SourceKind::Sample => Box::new(SampleSource),
        SourceKind::Generated => {
            let mut source = GeneratedSource::new(config.count).with_scenarios(config.scenarios);
            if let Some(seed) = config.seed {
                source = source.with_seed(seed);
            }
            Box::new(source)
        }
        SourceKind::Json => Box::new(JsonFileSource::new(require_path()?)),
        SourceKind::Csv => Box::new(CsvFileSource::new(require_path()?)),
    })
}

/// Load records from the configured source.
///
/// Failures are returned to the caller, which decides whether to fall back to
/// the sample fleet.
pub async fn load_records(config: &SourceConfig) -> Result<Vec<MachineRecord>, SourceError> {
    let source = source_for(config)?;
    let records = source.load().await?;
    tracing::info!(source = source.name(), records = records.len(), "Loaded records");
    Ok(records)
}
