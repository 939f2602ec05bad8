//! Query Abstract Syntax Tree
//!
//! Defines the AST for the fleet query language, a natural-language flavoured
//! query language over machine inventory records.
//!
//! # Example Queries
//!
//! ```text
//! Get Computer Name from all machines
//! Get Computer Name, CPU Percent from group "Laptops" where CPU Percent is greater than 80
//! Get avg(Compliance Score), count() from all machines group by Group
//! ```
//!
//! A [`Query`] is immutable once built. Engines share parsed queries through
//! `Arc<Query>`.

use crate::query::fields::FieldType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Span of source text a node was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Character offset of the first token
    pub start: usize,
    /// Character offset one past the last token
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

/// A parsed query ready for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub select: Select,
    pub from: From,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Where>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Query {
    /// Start building a query with the given columns
    pub fn select(columns: &[&str]) -> QueryBuilder {
        QueryBuilder::new(columns)
    }

    /// Whether the query needs the aggregation path
    pub fn is_aggregate(&self) -> bool {
        self.group_by.is_some() || !self.select.aggregates.is_empty()
    }

    /// WHERE filters, empty when there is no WHERE clause
    pub fn filters(&self) -> &[Filter] {
        self.where_clause
            .as_ref()
            .map(|w| w.filters.as_slice())
            .unwrap_or(&[])
    }

    /// Copy of this query with every source location removed.
    ///
    /// Two parses of equivalent text compare equal after stripping locations.
    pub fn without_locations(&self) -> Query {
        let mut query = self.clone();
        query.location = None;
        query.select.location = None;
        for column in &mut query.select.columns {
            column.location = None;
        }
        for aggregate in &mut query.select.aggregates {
            aggregate.location = None;
        }
        query.from.location = None;
        query.from.scope.location = None;
        if let Some(where_clause) = &mut query.where_clause {
            where_clause.location = None;
            for filter in &mut where_clause.filters {
                filter.location = None;
            }
        }
        if let Some(group_by) = &mut query.group_by {
            group_by.location = None;
        }
        if let Some(order_by) = &mut query.order_by {
            order_by.location = None;
        }
        if let Some(limit) = &mut query.limit {
            limit.location = None;
        }
        query
    }
}

/// The list of selected columns and aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub columns: Vec<Column>,
    pub aggregates: Vec<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// A selected column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            location: None,
        }
    }

    /// Alias if present, otherwise the column name
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Aggregation functions available in queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Min,
    Max,
    Avg,
    Sum,
}

impl AggregateFunction {
    /// Parse from string
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "avg" => Some(Self::Avg),
            "sum" => Some(Self::Sum),
            _ => None,
        }
    }

    /// Apply to a set of numeric values.
    ///
    /// Returns `None` on an empty set. `avg` and `sum` are rounded to two
    /// decimal places.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }

        Some(match self {
            Self::Count => values.len() as f64,
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Avg => round_to(values.iter().sum::<f64>() / values.len() as f64, 2),
            Self::Sum => round_to(values.iter().sum(), 2),
        })
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Avg => write!(f, "avg"),
            Self::Sum => write!(f, "sum"),
        }
    }
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// An aggregate call such as `avg(Compliance Score)` or `count()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Aggregate {
    pub fn new(function: AggregateFunction, column: Option<&str>) -> Self {
        Self {
            function,
            column: column.map(str::to_string),
            location: None,
        }
    }

    /// Result column header, e.g. `avg(Compliance Score)`
    pub fn header(&self) -> String {
        format!("{}({})", self.function, self.column.as_deref().unwrap_or(""))
    }
}

/// The FROM clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct From {
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// Kind of record subset a query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    All,
    Group,
    Filter,
}

/// Target scope of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub scope_type: ScopeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Scope {
    pub fn all() -> Self {
        Self {
            scope_type: ScopeType::All,
            value: None,
            location: None,
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Group,
            value: Some(name.into()),
            location: None,
        }
    }

    /// Label used in result metadata: the group name, or the scope kind
    pub fn label(&self) -> String {
        match &self.value {
            Some(value) if !value.is_empty() => value.clone(),
            _ => match self.scope_type {
                ScopeType::All => "all".to_string(),
                ScopeType::Group => "group".to_string(),
                ScopeType::Filter => "filter".to_string(),
            },
        }
    }
}

/// The WHERE clause: a flat conjunction of filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Contains,
    DoesNotContain,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    StartsWith,
    EndsWith,
}

impl FilterOperator {
    /// Whether the operator compares numerically
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::LessThan | Self::GreaterOrEqual | Self::LessOrEqual
        )
    }

    /// Query-language phrase for this operator
    pub fn phrase(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::DoesNotContain => "does not contain",
            Self::Equals => "equals",
            Self::NotEquals => "not equals",
            Self::GreaterThan => "is greater than",
            Self::LessThan => "is less than",
            Self::GreaterOrEqual => "is at least",
            Self::LessOrEqual => "is at most",
            Self::StartsWith => "starts with",
            Self::EndsWith => "ends with",
        }
    }

    /// Compare two numbers
    pub fn compare_f64(&self, a: f64, b: f64) -> bool {
        match self {
            Self::GreaterThan => a > b,
            Self::LessThan => a < b,
            Self::GreaterOrEqual => a >= b,
            Self::LessOrEqual => a <= b,
            _ => false,
        }
    }

    /// Compare two already-lowercased strings
    pub fn compare_str(&self, value: &str, target: &str) -> bool {
        match self {
            Self::Contains => value.contains(target),
            Self::DoesNotContain => !value.contains(target),
            Self::Equals => value == target,
            Self::NotEquals => value != target,
            Self::StartsWith => value.starts_with(target),
            Self::EndsWith => value.ends_with(target),
            _ => false,
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Contains => "contains",
            Self::DoesNotContain => "does_not_contain",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::LessOrEqual => "less_or_equal",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
        };
        write!(f, "{}", name)
    }
}

/// Values used in filter comparisons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

impl FilterValue {
    /// Text form of the value, numbers printed without a trailing `.0`
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

impl std::convert::From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl std::convert::From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl std::convert::From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl std::convert::From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// A single filter condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
    /// Registry type of the field, when known at parse time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Filter {
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        let field = field.into();
        Self {
            data_type: crate::query::fields::field_type(&field),
            field,
            operator,
            value: value.into(),
            location: None,
        }
    }
}

/// GROUP BY clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

/// One ORDER BY key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderColumn {
    pub column: String,
    pub direction: SortDirection,
}

/// ORDER BY clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub columns: Vec<OrderColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// LIMIT clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub value: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "\"")
}

/// Canonical query text. Parsing the output yields the same AST, apart from
/// source locations, for every query the parser can produce.
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Get ")?;

        let items: Vec<String> = self
            .select
            .columns
            .iter()
            .map(|c| c.name.clone())
            .chain(self.select.aggregates.iter().map(Aggregate::header))
            .collect();
        write!(f, "{}", items.join(", "))?;

        write!(f, " from ")?;
        match (&self.from.scope.scope_type, &self.from.scope.value) {
            (ScopeType::Group, Some(name)) => {
                write!(f, "group ")?;
                write_quoted(f, name)?;
            }
            _ => write!(f, "all machines")?,
        }

        if let Some(where_clause) = &self.where_clause {
            write!(f, " where ")?;
            for (i, filter) in where_clause.filters.iter().enumerate() {
                if i > 0 {
                    write!(f, " and ")?;
                }
                write!(f, "{} {} ", filter.field, filter.operator.phrase())?;
                match &filter.value {
                    FilterValue::Text(s) => write_quoted(f, s)?,
                    FilterValue::Number(n) => write!(f, "{}", n)?,
                }
            }
        }

        if let Some(group_by) = &self.group_by {
            write!(f, " group by {}", group_by.columns.join(", "))?;
        }

        if let Some(order_by) = &self.order_by {
            let keys: Vec<String> = order_by
                .columns
                .iter()
                .map(|c| format!("{} {}", c.column, c.direction))
                .collect();
            write!(f, " order by {}", keys.join(", "))?;
        }

        if let Some(limit) = &self.limit {
            write!(f, " limit {}", limit.value)?;
        }

        Ok(())
    }
}

/// Builder for constructing queries programmatically
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    columns: Vec<Column>,
    aggregates: Vec<Aggregate>,
    scope: Scope,
    filters: Vec<Filter>,
    group_by: Vec<String>,
    order_by: Vec<OrderColumn>,
    limit: Option<usize>,
}

impl QueryBuilder {
    /// Create a new query builder with the given columns
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| Column::new(*c)).collect(),
            aggregates: Vec::new(),
            scope: Scope::all(),
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Add an aggregate to the select list
    pub fn aggregate(mut self, function: AggregateFunction, column: Option<&str>) -> Self {
        self.aggregates.push(Aggregate::new(function, column));
        self
    }

    /// Target a named group instead of all machines
    pub fn from_group(mut self, name: impl Into<String>) -> Self {
        self.scope = Scope::group(name);
        self
    }

    /// Add a filter
    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        self.filters.push(Filter::new(field, operator, value));
        self
    }

    /// Add a `not_equals` filter
    pub fn not_equals(self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filter(field, FilterOperator::NotEquals, value)
    }

    /// Add a `greater_or_equal` filter
    pub fn greater_or_equal(self, field: impl Into<String>, value: f64) -> Self {
        self.filter(field, FilterOperator::GreaterOrEqual, value)
    }

    /// Add a `less_or_equal` filter
    pub fn less_or_equal(self, field: impl Into<String>, value: f64) -> Self {
        self.filter(field, FilterOperator::LessOrEqual, value)
    }

    /// Add GROUP BY columns
    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Add an ORDER BY key
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderColumn {
            column: column.into(),
            direction,
        });
        self
    }

    /// Set a limit on results
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Build the query
    pub fn build(self) -> Query {
        Query {
            select: Select {
                columns: self.columns,
                aggregates: self.aggregates,
                location: None,
            },
            from: From {
                scope: self.scope,
                location: None,
            },
            where_clause: (!self.filters.is_empty()).then(|| Where {
                filters: self.filters,
                location: None,
            }),
            group_by: (!self.group_by.is_empty()).then(|| GroupBy {
                columns: self.group_by,
                location: None,
            }),
            order_by: (!self.order_by.is_empty()).then(|| OrderBy {
                columns: self.order_by,
                location: None,
            }),
            limit: self.limit.map(|value| Limit {
                value,
                location: None,
            }),
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder_basic() {
        let query = Query::select(&["Computer Name"]).build();

        assert_eq!(query.select.columns.len(), 1);
        assert_eq!(query.select.columns[0].name, "Computer Name");
        assert_eq!(query.from.scope.scope_type, ScopeType::All);
        assert!(query.where_clause.is_none());
        assert!(!query.is_aggregate());
    }

    #[test]
    fn test_query_builder_full() {
        let query = Query::select(&["Location"])
            .aggregate(AggregateFunction::Avg, Some("CPU Percent"))
            .from_group("servers")
            .filter("CPU Percent", FilterOperator::GreaterThan, 50.0)
            .not_equals("Location", "Lab")
            .group_by(&["Location"])
            .order_by("Location", SortDirection::Desc)
            .limit(5)
            .build();

        assert!(query.is_aggregate());
        assert_eq!(query.from.scope.label(), "servers");
        assert_eq!(query.filters().len(), 2);
        assert_eq!(query.filters()[0].data_type, Some(FieldType::Number));
        assert_eq!(query.filters()[1].operator, FilterOperator::NotEquals);
        assert_eq!(query.limit.as_ref().map(|l| l.value), Some(5));
    }

    #[test]
    fn test_aggregate_apply() {
        assert_eq!(AggregateFunction::Avg.apply(&[10.0, 20.0, 30.0]), Some(20.0));
        assert_eq!(AggregateFunction::Sum.apply(&[]), None);
        assert_eq!(AggregateFunction::Min.apply(&[3.0, 1.5, 2.0]), Some(1.5));
        assert_eq!(AggregateFunction::Max.apply(&[3.0, 1.5, 2.0]), Some(3.0));
        assert_eq!(AggregateFunction::Avg.apply(&[1.0, 1.0, 2.0]), Some(1.33));
        assert_eq!(AggregateFunction::Sum.apply(&[0.5, 0.25, 0.125]), Some(0.88));
    }

    #[test]
    fn test_aggregate_header() {
        let avg = Aggregate::new(AggregateFunction::Avg, Some("Compliance Score"));
        assert_eq!(avg.header(), "avg(Compliance Score)");
        assert_eq!(Aggregate::new(AggregateFunction::Count, None).header(), "count()");
    }

    #[test]
    fn test_operator_comparisons() {
        assert!(FilterOperator::Contains.compare_str("windows 10", "windows"));
        assert!(!FilterOperator::DoesNotContain.compare_str("windows 10", "windows"));
        assert!(FilterOperator::EndsWith.compare_str("srv-01", "01"));
        assert!(FilterOperator::GreaterOrEqual.compare_f64(80.0, 80.0));
        assert!(!FilterOperator::GreaterThan.compare_f64(80.0, 80.0));
        assert!(FilterOperator::LessThan.is_numeric());
        assert!(!FilterOperator::Equals.is_numeric());
    }

    #[test]
    fn test_display_renders_canonical_text() {
        let query = Query::select(&["Computer Name", "CPU Percent"])
            .from_group("Finance \"East\"")
            .filter("CPU Percent", FilterOperator::GreaterThan, 80.0)
            .filter("OS Platform", FilterOperator::DoesNotContain, "Win")
            .order_by("CPU Percent", SortDirection::Desc)
            .limit(3)
            .build();

        assert_eq!(
            query.to_string(),
            "Get Computer Name, CPU Percent from group \"Finance \\\"East\\\"\" \
             where CPU Percent is greater than 80 and OS Platform does not contain \"Win\" \
             order by CPU Percent desc limit 3"
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let query = Query::select(&["Location"])
            .group_by(&["Location"])
            .filter("CPU Percent", FilterOperator::LessThan, 10.0)
            .build();
        let json = serde_json::to_value(&query).unwrap();

        assert!(json.get("groupBy").is_some());
        assert_eq!(json["where"]["filters"][0]["operator"], "less_than");
        assert_eq!(json["where"]["filters"][0]["value"], 10.0);
        assert_eq!(json["from"]["scope"]["scopeType"], "all");

        let back: Query = serde_json::from_value(json).unwrap();
        assert_eq!(back, query);
    }
}
