//! Query results
//!
//! [`ResultSet`] is the tabular answer to a query: headers, rows of [`Cell`]s,
//! warnings, timing metrics and metadata. It serializes with camelCase field
//! names (`rowCount`, `errorPosition`, ...).

use crate::query::error::QueryError;
use crate::source::FieldValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output format requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Table,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// A single result cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Null,
}

impl Cell {
    /// Convert a record value for output: numbers rounded to three decimals,
    /// dates in ISO-8601
    pub fn from_value(value: FieldValue<'_>) -> Self {
        match value {
            FieldValue::Text(s) => Self::Text(s.to_string()),
            FieldValue::Number(n) => Self::Number((n * 1000.0).round() / 1000.0),
            FieldValue::Date(d) => Self::Text(d.format("%Y-%m-%d").to_string()),
            FieldValue::Null => Self::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map(Self::Number).unwrap_or(Self::Null)
    }
}

/// Warning severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A non-fatal condition met while executing a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    pub severity: Severity,
}

impl Warning {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

/// Timing and volume metrics for one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub parse_time_ms: f64,
    pub plan_time_ms: f64,
    pub execute_time_ms: f64,
    pub total_time_ms: f64,
    /// Records left after scope filtering
    pub scoped: usize,
    /// Records left after WHERE filtering
    pub filtered: usize,
    pub rows_examined: usize,
    pub cache_hit: bool,
}

/// Summary of the query that produced a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Aggregate function names in select order, e.g. `avg`
    pub aggregations: Vec<String>,
    pub group_by: Option<String>,
    pub order_by: Option<String>,
    pub order_dir: String,
    pub limit: Option<usize>,
    pub scope: String,
    pub filters: usize,
}

impl Default for ResultMetadata {
    fn default() -> Self {
        Self {
            aggregations: Vec::new(),
            group_by: None,
            order_by: None,
            order_dir: "asc".to_string(),
            limit: None,
            scope: "all".to_string(),
            filters: 0,
        }
    }
}

/// Result of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<Cell>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv: Option<String>,
}

impl ResultSet {
    /// A successful result
    pub fn success(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            ok: true,
            error: None,
            error_position: None,
            row_count: Some(rows.len()),
            headers: Some(headers),
            rows: Some(rows),
            warnings: Vec::new(),
            execution: None,
            metadata: None,
            cached: false,
            csv: None,
        }
    }

    /// A failed result carrying the error message and position
    pub fn failure(error: &QueryError, execution: ExecutionMetrics) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            error_position: error.position(),
            headers: None,
            rows: None,
            row_count: None,
            warnings: Vec::new(),
            execution: Some(execution),
            metadata: None,
            cached: false,
            csv: None,
        }
    }

    pub fn headers(&self) -> &[String] {
        self.headers.as_deref().unwrap_or(&[])
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        self.rows.as_deref().unwrap_or(&[])
    }

    /// Index of a header, compared case-insensitively
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers()
            .iter()
            .position(|h| h.eq_ignore_ascii_case(header))
    }

    /// All cells of one column
    pub fn column(&self, header: &str) -> Vec<&Cell> {
        match self.column_index(header) {
            Some(i) => self.rows().iter().filter_map(|r| r.get(i)).collect(),
            None => Vec::new(),
        }
    }

    /// Render headers and rows as CSV
    pub fn to_csv(&self) -> String {
        format_csv(self.headers(), self.rows())
    }

    /// Render as an aligned text table
    pub fn to_table(&self) -> String {
        if !self.ok {
            return format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }

        let headers = self.headers();
        let rendered: Vec<Vec<String>> = self
            .rows()
            .iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect();

        let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
        for row in &rendered {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let line = |cells: &[String]| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<width$}", c, width = *w))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = Vec::with_capacity(rendered.len() + 3);
        out.push(line(headers));
        out.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &rendered {
            out.push(line(row));
        }

        let count = self.rows().len();
        out.push(format!(
            "({} row{})",
            count,
            if count == 1 { "" } else { "s" }
        ));
        out.join("\n")
    }
}

/// Quote a CSV cell when it contains a comma, quote or newline
pub fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render a table as CSV. Null cells are empty and lines are joined by `\n`.
pub fn format_csv(headers: &[String], rows: &[Vec<Cell>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        headers
            .iter()
            .map(|h| escape_csv(h))
            .collect::<Vec<_>>()
            .join(","),
    );

    for row in rows {
        lines.push(
            row.iter()
                .map(|cell| match cell {
                    Cell::Null => String::new(),
                    other => escape_csv(&other.to_string()),
                })
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_cell_from_value() {
        assert_eq!(
            Cell::from_value(FieldValue::Number(1.23456)),
            Cell::Number(1.235)
        );
        assert_eq!(
            Cell::from_value(FieldValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())),
            Cell::Text("2024-05-01".into())
        );
        assert_eq!(Cell::from_value(FieldValue::Null), Cell::Null);
    }

    #[test]
    fn test_csv_escaping() {
        let headers = vec!["Name".to_string(), "Note".to_string(), "Value".to_string()];
        let rows = vec![
            vec![Cell::from("a,b"), Cell::from("say \"hi\""), Cell::Number(80.0)],
            vec![Cell::from("line\nbreak"), Cell::Null, Cell::Number(0.5)],
        ];

        assert_eq!(
            format_csv(&headers, &rows),
            "Name,Note,Value\n\"a,b\",\"say \"\"hi\"\"\",80\n\"line\nbreak\",,0.5"
        );
    }

    #[test]
    fn test_serializes_contract_names() {
        let mut result = ResultSet::success(
            vec!["Computer Name".into()],
            vec![vec![Cell::from("LAPTOP-001")], vec![Cell::Null]],
        );
        result.execution = Some(ExecutionMetrics::default());
        result.metadata = Some(ResultMetadata::default());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["rowCount"], 2);
        assert_eq!(json["rows"][1][0], serde_json::Value::Null);
        assert_eq!(json["execution"]["cacheHit"], false);
        assert_eq!(json["metadata"]["orderDir"], "asc");
        assert!(json.get("errorPosition").is_none());

        let back: ResultSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_failure_result() {
        let err = QueryError::Parse {
            message: "Query must start with \"Get\"".into(),
            position: Some(0),
            line: Some(1),
            column: Some(1),
        };
        let result = ResultSet::failure(&err, ExecutionMetrics::default());

        assert!(!result.ok);
        assert_eq!(result.error_position, Some(0));
        assert!(result.rows().is_empty());
        assert!(result.to_table().starts_with("Error:"));
    }

    #[test]
    fn test_to_table() {
        let result = ResultSet::success(
            vec!["Computer Name".into(), "CPU".into()],
            vec![
                vec![Cell::from("A"), Cell::Number(5.0)],
                vec![Cell::from("LONG-NAME-1234"), Cell::Null],
            ],
        );

        let table = result.to_table();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Computer Name  | CPU");
        assert_eq!(lines[1], "---------------+-----");
        assert_eq!(lines[2], "A              | 5");
        assert_eq!(lines[3], "LONG-NAME-1234 | null");
        assert_eq!(lines[4], "(2 rows)");
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let result = ResultSet::success(
            vec!["CPU Percent".into()],
            vec![vec![Cell::Number(1.0)], vec![Cell::Number(2.0)]],
        );
        assert_eq!(result.column_index("cpu percent"), Some(0));
        assert_eq!(result.column("CPU PERCENT").len(), 2);
        assert!(result.column("missing").is_empty());
    }
}
