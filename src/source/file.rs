//! File-backed record sources
//!
//! JSON files hold an array of records. CSV files carry a header row naming
//! record columns (`computer_name`, `cpu_percent`, ...); rows that fail to
//! deserialize are skipped and logged.

use super::*;
use std::path::{Path, PathBuf};

/// Records from a JSON array file
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for JsonFileSource {
    fn name(&self) -> &str {
        "json"
    }

    async fn load(&self) -> Result<Vec<MachineRecord>, SourceError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let records: Vec<MachineRecord> = serde_json::from_slice(&bytes)?;
        Ok(records)
    }
}

/// Records from a CSV file with a header row
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse CSV content, skipping rows that fail to deserialize
    pub fn parse(content: &[u8]) -> Result<Vec<MachineRecord>, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content);

        // Fail early on a missing or unreadable header row
        reader.headers()?;

        let mut records = Vec::new();
        let mut rows_failed = 0;

        for (line_num, result) in reader.deserialize::<MachineRecord>().enumerate() {
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    rows_failed += 1;
                    tracing::warn!(line = line_num + 2, error = %e, "Skipping malformed CSV row");
                }
            }
        }

        if rows_failed > 0 {
            tracing::warn!(rows_failed, rows_loaded = records.len(), "CSV import had failures");
        }

        Ok(records)
    }
}

#[async_trait]
impl RecordSource for CsvFileSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn load(&self) -> Result<Vec<MachineRecord>, SourceError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Self::parse(&bytes)
    }
}
