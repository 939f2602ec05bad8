//! Query Executor
//!
//! Executes a Query AST against an in-memory record set.
//!
//! # Execution Pipeline
//!
//! ```text
//! Query → Plan → Scope → Filter → Project | Aggregate → Sort → Limit → Result
//! ```
//!
//! Problems that do not stop execution, such as an unknown filter field, are
//! reported as warnings on the result. Deadline and row-count violations fail
//! the query with an execution error carrying a `TIMEOUT` or `ROW_LIMIT` code.

use crate::query::ast::{
    Aggregate, AggregateFunction, Filter, FilterOperator, FilterValue, OrderBy, Query, Scope,
    ScopeType, Select, SortDirection,
};
use crate::query::error::{QueryError, QueryResult};
use crate::query::fields;
use crate::query::plan::{PlanNode, EXPLAIN_HEADERS};
use crate::query::result::{
    format_csv, Cell, ExecutionMetrics, OutputFormat, ResultMetadata, ResultSet, Severity,
    Warning,
};
use crate::source::{FieldValue, MachineRecord};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records between deadline checks inside a stage
const DEADLINE_CHECK_INTERVAL: usize = 1024;

/// Executor settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    /// Wall-clock budget for one execution. Zero disables the check.
    pub timeout: Duration,
    /// Largest result allowed after LIMIT. Zero disables the check.
    pub max_rows: usize,
    pub format: OutputFormat,
    /// Return the plan instead of running the query
    pub explain_only: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_rows: 10_000,
            format: OutputFormat::Json,
            explain_only: false,
        }
    }
}

/// Per-execution state
struct ExecutionContext {
    started: Instant,
    timeout: Duration,
    warnings: Vec<Warning>,
    metrics: ExecutionMetrics,
}

impl ExecutionContext {
    fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            warnings: Vec::new(),
            metrics: ExecutionMetrics::default(),
        }
    }

    fn warn(&mut self, message: impl Into<String>, severity: Severity) {
        let warning = Warning::new(message, severity);
        tracing::warn!(message = %warning.message, "Query warning");
        self.warnings.push(warning);
    }

    fn check_deadline(&self, stage: &str) -> QueryResult<()> {
        if self.timeout.is_zero() || self.started.elapsed() < self.timeout {
            return Ok(());
        }
        Err(QueryError::execution_with_code(
            format!(
                "Query exceeded timeout of {}ms during {}",
                self.timeout.as_millis(),
                stage
            ),
            "TIMEOUT",
        ))
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Query executor
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    records: Arc<Vec<MachineRecord>>,
    options: ExecutorOptions,
}

impl QueryExecutor {
    /// Create a new query executor
    pub fn new(records: Arc<Vec<MachineRecord>>, options: ExecutorOptions) -> Self {
        Self { records, options }
    }

    /// Same records, different options
    pub fn with_options(&self, options: ExecutorOptions) -> Self {
        Self {
            records: Arc::clone(&self.records),
            options,
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn records(&self) -> &Arc<Vec<MachineRecord>> {
        &self.records
    }

    /// Estimated plan for a query over the current records
    pub fn plan(&self, query: &Query) -> PlanNode {
        PlanNode::for_query(query, self.records.len())
    }

    /// Execute a query string (parses and executes)
    pub async fn execute_str(&self, query_str: &str) -> QueryResult<ResultSet> {
        let parse_start = Instant::now();
        let query = crate::query::parser::parse(query_str)?;
        let parse_time_ms = elapsed_ms(parse_start);

        let mut result = self.execute(&query).await?;
        if let Some(execution) = result.execution.as_mut() {
            execution.parse_time_ms = parse_time_ms;
            execution.total_time_ms += parse_time_ms;
        }
        Ok(result)
    }

    /// Execute a parsed query
    pub async fn execute(&self, query: &Query) -> QueryResult<ResultSet> {
        if self.options.explain_only {
            return Ok(self.explain(query));
        }

        self.run(query).map_err(|e| match e {
            QueryError::Execution { .. } => e,
            other => QueryError::execution(format!("Query execution failed: {}", other)),
        })
    }

    /// Describe the plan as a result with Operation, Cost, Rows and Details
    /// columns
    pub fn explain(&self, query: &Query) -> ResultSet {
        let started = Instant::now();
        let plan = self.plan(query);
        let rows = plan.explain_rows();
        let plan_time_ms = elapsed_ms(started);

        let mut result = ResultSet::success(
            EXPLAIN_HEADERS.iter().map(|h| h.to_string()).collect(),
            rows,
        );
        result.execution = Some(ExecutionMetrics {
            plan_time_ms,
            total_time_ms: plan_time_ms,
            rows_examined: self.records.len(),
            ..Default::default()
        });
        result.metadata = Some(metadata(query));
        self.render(&mut result);
        result
    }

    fn run(&self, query: &Query) -> QueryResult<ResultSet> {
        let mut ctx = ExecutionContext::new(self.options.timeout);

        let plan_start = Instant::now();
        let plan = self.plan(query);
        ctx.metrics.plan_time_ms = elapsed_ms(plan_start);
        tracing::debug!(
            estimated_rows = plan.estimated_rows(),
            cost = plan.total_cost(),
            "Planned query"
        );
        ctx.check_deadline("planning")?;

        let execute_start = Instant::now();
        ctx.metrics.rows_examined = self.records.len();

        let scoped = apply_scope(&self.records, &query.from.scope);
        ctx.metrics.scoped = scoped.len();
        ctx.check_deadline("scope")?;

        let filtered = apply_filters(scoped, query.filters(), &mut ctx)?;
        ctx.metrics.filtered = filtered.len();

        let (headers, mut rows) = if query.is_aggregate() {
            aggregate(&filtered, query, &mut ctx)
        } else {
            project(&filtered, &query.select, &mut ctx)
        };
        ctx.check_deadline("projection")?;

        if let Some(order_by) = &query.order_by {
            sort_rows(&mut rows, &headers, order_by, &mut ctx);
            ctx.check_deadline("sort")?;
        }

        if let Some(limit) = &query.limit {
            rows.truncate(limit.value);
        }

        if self.options.max_rows > 0 && rows.len() > self.options.max_rows {
            return Err(QueryError::execution_with_code(
                format!(
                    "Result has {} rows, exceeding the maximum of {}",
                    rows.len(),
                    self.options.max_rows
                ),
                "ROW_LIMIT",
            ));
        }

        ctx.metrics.execute_time_ms = elapsed_ms(execute_start);
        ctx.metrics.total_time_ms = elapsed_ms(ctx.started);

        let mut result = ResultSet::success(headers, rows);
        result.warnings = ctx.warnings;
        result.execution = Some(ctx.metrics);
        result.metadata = Some(metadata(query));
        self.render(&mut result);

        tracing::debug!(
            rows = result.rows().len(),
            total_ms = result.execution.as_ref().map(|e| e.total_time_ms),
            "Executed query"
        );
        Ok(result)
    }

    fn render(&self, result: &mut ResultSet) {
        if self.options.format == OutputFormat::Csv {
            result.csv = Some(format_csv(result.headers(), result.rows()));
        }
    }
}

fn metadata(query: &Query) -> ResultMetadata {
    let first_order = query.order_by.as_ref().and_then(|o| o.columns.first());

    ResultMetadata {
        aggregations: query
            .select
            .aggregates
            .iter()
            .map(|a| a.function.to_string())
            .collect(),
        group_by: query
            .group_by
            .as_ref()
            .and_then(|g| g.columns.first().cloned()),
        order_by: first_order.map(|o| o.column.clone()),
        order_dir: first_order
            .map(|o| o.direction)
            .unwrap_or_default()
            .to_string(),
        limit: query.limit.as_ref().map(|l| l.value),
        scope: query.from.scope.label(),
        filters: query.filters().len(),
    }
}

fn apply_scope<'a>(records: &'a [MachineRecord], scope: &Scope) -> Vec<&'a MachineRecord> {
    match (scope.scope_type, scope.value.as_deref()) {
        (ScopeType::Group, Some(name)) if !name.trim().is_empty() => {
            let group = fields::resolve_group_alias(name);
            records
                .iter()
                .filter(|r| r.group_name.as_deref() == Some(group.as_str()))
                .collect()
        }
        _ => records.iter().collect(),
    }
}

/// A filter resolved against the field registry
struct ResolvedFilter<'q> {
    column: &'static str,
    operator: FilterOperator,
    value: &'q FilterValue,
}

fn apply_filters<'a>(
    records: Vec<&'a MachineRecord>,
    filters: &[Filter],
    ctx: &mut ExecutionContext,
) -> QueryResult<Vec<&'a MachineRecord>> {
    let mut resolved = Vec::with_capacity(filters.len());
    for filter in filters {
        let Some(column) = fields::db_column(&filter.field) else {
            ctx.warn(format!("Unknown field: {}", filter.field), Severity::Warning);
            continue;
        };

        if !fields::validate_field_operator(&filter.field, filter.operator) {
            ctx.warn(
                format!(
                    "Operator '{}' may not be compatible with field '{}'",
                    filter.operator, filter.field
                ),
                Severity::Warning,
            );
        }

        resolved.push(ResolvedFilter {
            column,
            operator: filter.operator,
            value: &filter.value,
        });
    }

    if resolved.is_empty() {
        return Ok(records);
    }

    let mut kept = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        if i % DEADLINE_CHECK_INTERVAL == 0 {
            ctx.check_deadline("filtering")?;
        }
        if resolved
            .iter()
            .all(|f| matches_filter(record.value(f.column), f.operator, f.value))
        {
            kept.push(record);
        }
    }
    Ok(kept)
}

/// Numeric coercion: numbers pass through, text is trimmed and parsed (empty
/// text reads as zero), everything else has no numeric value
fn coerce_number(value: FieldValue<'_>) -> Option<f64> {
    match value {
        FieldValue::Number(n) => Some(n),
        FieldValue::Text(s) => parse_number(s),
        FieldValue::Date(_) | FieldValue::Null => None,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Some(0.0);
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    s.parse::<f64>().ok()
}

/// Evaluate one filter against a record value.
///
/// A null value satisfies only `does_not_contain` and `not_equals`, which
/// keeps every text operator the exact negation of its counterpart.
fn matches_filter(value: FieldValue<'_>, operator: FilterOperator, target: &FilterValue) -> bool {
    if value.is_null() {
        return matches!(
            operator,
            FilterOperator::DoesNotContain | FilterOperator::NotEquals
        );
    }

    if operator.is_numeric() {
        let target = match target {
            FilterValue::Number(n) => Some(*n),
            FilterValue::Text(s) => parse_number(s),
        };
        return match (coerce_number(value), target) {
            (Some(a), Some(b)) => operator.compare_f64(a, b),
            _ => false,
        };
    }

    let text = value.to_text().unwrap_or_default().to_lowercase();
    operator.compare_str(&text, &target.as_text().to_lowercase())
}

fn project(
    records: &[&MachineRecord],
    select: &Select,
    ctx: &mut ExecutionContext,
) -> (Vec<String>, Vec<Vec<Cell>>) {
    let headers: Vec<String> = if select.columns.is_empty() {
        vec!["Computer Name".to_string()]
    } else {
        select
            .columns
            .iter()
            .map(|c| c.display_name().to_string())
            .collect()
    };

    let names: Vec<&str> = if select.columns.is_empty() {
        vec!["Computer Name"]
    } else {
        select.columns.iter().map(|c| c.name.as_str()).collect()
    };

    let columns: Vec<Option<&'static str>> = names
        .iter()
        .map(|name| {
            let column = fields::db_column(name);
            if column.is_none() {
                ctx.warn(format!("Unknown column: {}", name), Severity::Info);
            }
            column
        })
        .collect();

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| match column {
                    Some(column) => Cell::from_value(record.value(column)),
                    None => Cell::Null,
                })
                .collect()
        })
        .collect();

    (headers, rows)
}

fn aggregate(
    records: &[&MachineRecord],
    query: &Query,
    ctx: &mut ExecutionContext,
) -> (Vec<String>, Vec<Vec<Cell>>) {
    let default_count;
    let aggregates: &[Aggregate] = if query.select.aggregates.is_empty() {
        default_count = [Aggregate::new(AggregateFunction::Count, None)];
        &default_count
    } else {
        &query.select.aggregates
    };

    let group_column = query.group_by.as_ref().and_then(|g| g.columns.first());

    let mut headers: Vec<String> = group_column.into_iter().cloned().collect();
    headers.extend(aggregates.iter().map(Aggregate::header));

    let Some(group_column) = group_column else {
        let row = aggregates.iter().map(|a| compute(records, a)).collect();
        return (headers, vec![row]);
    };

    let Some(key_column) = fields::db_column(group_column) else {
        ctx.warn(
            format!("Unknown group by column: {}", group_column),
            Severity::Error,
        );
        return (headers, Vec::new());
    };

    // Groups keep first-seen order
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&MachineRecord>)> = Vec::new();
    for &record in records {
        let key = record
            .value(key_column)
            .to_text()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| "null".to_string());

        match index.get(&key) {
            Some(&i) => groups[i].1.push(record),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![record]));
            }
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, members)| {
            let mut row = Vec::with_capacity(aggregates.len() + 1);
            row.push(Cell::Text(key));
            row.extend(aggregates.iter().map(|a| compute(&members, a)));
            row
        })
        .collect();

    (headers, rows)
}

/// Compute one aggregate over a group of records
fn compute(records: &[&MachineRecord], aggregate: &Aggregate) -> Cell {
    let column = aggregate.column.as_deref().filter(|c| !c.trim().is_empty());

    if aggregate.function == AggregateFunction::Count {
        let count = match column {
            None => records.len(),
            Some(name) => match fields::db_column(name) {
                Some(column) => records
                    .iter()
                    .filter(|r| !r.value(column).is_null())
                    .count(),
                None => 0,
            },
        };
        return Cell::Number(count as f64);
    }

    let Some(column) = column.and_then(fields::db_column) else {
        return Cell::Null;
    };

    let values: Vec<f64> = records
        .iter()
        .filter_map(|r| coerce_number(r.value(column)))
        .filter(|n| n.is_finite())
        .collect();

    Cell::from(aggregate.function.apply(&values))
}

fn compare_cells(a: &Cell, b: &Cell, direction: SortDirection) -> Ordering {
    let ascending = direction == SortDirection::Asc;

    // Nulls sort first ascending and last descending
    let ordering = match (a, b) {
        (Cell::Null, Cell::Null) => return Ordering::Equal,
        (Cell::Null, _) => return if ascending { Ordering::Less } else { Ordering::Greater },
        (_, Cell::Null) => return if ascending { Ordering::Greater } else { Ordering::Less },
        (Cell::Number(x), Cell::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        _ => {
            let (x, y) = (a.to_string(), b.to_string());
            x.to_lowercase()
                .cmp(&y.to_lowercase())
                .then_with(|| x.cmp(&y))
        }
    };

    if ascending {
        ordering
    } else {
        ordering.reverse()
    }
}

/// Stable multi-key sort. Keys are matched to headers case-insensitively and
/// unknown keys are skipped.
fn sort_rows(
    rows: &mut [Vec<Cell>],
    headers: &[String],
    order_by: &OrderBy,
    ctx: &mut ExecutionContext,
) {
    let keys: Vec<(usize, SortDirection)> = order_by
        .columns
        .iter()
        .filter_map(|key| {
            let index = headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(key.column.trim()));
            if index.is_none() {
                ctx.warn(
                    format!("Unknown order by column: {}", key.column),
                    Severity::Warning,
                );
            }
            index.map(|i| (i, key.direction))
        })
        .collect();

    if keys.is_empty() {
        return;
    }

    rows.sort_by(|a, b| {
        keys.iter()
            .map(|&(i, direction)| match (a.get(i), b.get(i)) {
                (Some(x), Some(y)) => compare_cells(x, y, direction),
                _ => Ordering::Equal,
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::round_to;
    use crate::query::parser::{parse, parse_with_options, ParserOptions};
    use crate::source::sample_records;

    fn machine(name: &str, group: &str, os: &str, cpu: Option<f64>, compliance: f64) -> MachineRecord {
        MachineRecord {
            computer_name: name.to_string(),
            group_name: Some(group.to_string()),
            os_platform: Some(os.to_string()),
            cpu_percent: cpu,
            compliance_score: Some(compliance),
            ..Default::default()
        }
    }

    fn three_machines() -> Vec<MachineRecord> {
        vec![
            machine("WKS-1", "Laptops", "Windows 10", Some(91.0), 0.8),
            machine("WKS-2", "Laptops", "macOS", None, 0.6),
            machine("SRV-1", "Data Center Servers", "Linux", Some(42.0), 0.9),
        ]
    }

    fn executor(records: Vec<MachineRecord>) -> QueryExecutor {
        QueryExecutor::new(Arc::new(records), ExecutorOptions::default())
    }

    #[tokio::test]
    async fn test_simple_query() {
        let result = executor(three_machines())
            .execute_str("Get Computer Name from all machines")
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.headers(), ["Computer Name"]);
        assert_eq!(result.row_count, Some(3));
        assert_eq!(result.rows()[0][0], Cell::from("WKS-1"));

        let execution = result.execution.unwrap();
        assert_eq!(execution.rows_examined, 3);
        assert_eq!(execution.filtered, 3);
        assert!(!execution.cache_hit);
        assert_eq!(result.metadata.unwrap().scope, "all");
    }

    #[tokio::test]
    async fn test_group_scope_resolves_alias() {
        let executor = executor(sample_records());
        let result = executor
            .execute_str("Get Computer Name from group \"servers\"")
            .await
            .unwrap();

        assert_eq!(result.row_count, Some(3));
        assert_eq!(result.execution.unwrap().scoped, 3);
        assert_eq!(result.metadata.unwrap().scope, "servers");
    }

    #[tokio::test]
    async fn test_group_scope_is_exact_after_alias() {
        let group = |name: &str, group: &str| MachineRecord {
            group_name: Some(group.to_string()),
            ..MachineRecord::named(name)
        };
        let executor = executor(vec![
            group("A", "Laptops Lab"),
            group("B", "LAPTOPS LAB"),
            group("C", "Laptops"),
        ]);

        let result = executor
            .execute_str("Get Computer Name from group \"Laptops Lab\"")
            .await
            .unwrap();
        assert_eq!(result.rows(), [vec![Cell::from("A")]]);

        // No alias for the lowercase spelling, so nothing matches
        let result = executor
            .execute_str("Get Computer Name from group \"laptops lab\"")
            .await
            .unwrap();
        assert_eq!(result.row_count, Some(0));

        // The alias table supplies case-insensitivity
        let result = executor
            .execute_str("Get Computer Name from group \"LAPTOPS\"")
            .await
            .unwrap();
        assert_eq!(result.rows(), [vec![Cell::from("C")]]);
    }

    #[tokio::test]
    async fn test_highest_cpu_first() {
        let executor = executor(sample_records());
        let result = executor
            .execute_str(
                "Get Computer Name, CPU Percent from all machines \
                 where CPU Percent is greater than \"50\" order by CPU Percent desc limit 1",
            )
            .await
            .unwrap();

        assert_eq!(result.rows().len(), 1);
        let top = result.rows()[0][1].as_f64().unwrap();
        assert!(sample_records()
            .iter()
            .all(|r| r.cpu_percent.unwrap_or(0.0) <= top));
        assert_eq!(result.rows()[0][0], Cell::from("LAPTOP-002"));
    }

    #[tokio::test]
    async fn test_order_by_unselected_column_is_rejected() {
        let err = executor(sample_records())
            .execute_str(
                "Get Computer Name from all machines where CPU Percent is greater than \"80\" \
                 order by CPU Percent desc limit 1",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ParseError");
    }

    #[tokio::test]
    async fn test_group_by_matches_manual_statistics() {
        let records = sample_records();
        let result = executor(records.clone())
            .execute_str("Get avg(Compliance Score), count() from all machines group by Group")
            .await
            .unwrap();

        assert_eq!(
            result.headers(),
            ["Group", "avg(Compliance Score)", "count()"]
        );

        let mut expected: Vec<String> = Vec::new();
        for r in &records {
            let g = r.group_name.clone().unwrap();
            if !expected.contains(&g) {
                expected.push(g);
            }
        }
        assert_eq!(result.rows().len(), expected.len());

        for (row, group) in result.rows().iter().zip(&expected) {
            assert_eq!(row[0], Cell::Text(group.clone()));
            let members: Vec<f64> = records
                .iter()
                .filter(|r| r.group_name.as_deref() == Some(group))
                .filter_map(|r| r.compliance_score)
                .collect();
            let avg = round_to(members.iter().sum::<f64>() / members.len() as f64, 2);
            assert_eq!(row[1], Cell::Number(avg));
            assert_eq!(row[2], Cell::Number(members.len() as f64));
        }
    }

    #[tokio::test]
    async fn test_aggregates_without_group() {
        let records = vec![
            machine("A", "Laptops", "Windows 11", Some(10.0), 0.5),
            machine("B", "Laptops", "Windows 11", Some(20.0), 0.5),
            machine("C", "Laptops", "Windows 11", Some(30.0), 0.5),
            machine("D", "Laptops", "Windows 11", None, 0.5),
        ];
        let result = executor(records)
            .execute_str(
                "Get avg(CPU Percent), count(), count(CPU Percent), sum(Memory GB), max(CPU Percent) \
                 from all machines",
            )
            .await
            .unwrap();

        assert_eq!(result.rows().len(), 1);
        let row = &result.rows()[0];
        assert_eq!(row[0], Cell::Number(20.0));
        assert_eq!(row[1], Cell::Number(4.0));
        assert_eq!(row[2], Cell::Number(3.0));
        assert_eq!(row[3], Cell::Null);
        assert_eq!(row[4], Cell::Number(30.0));
        assert_eq!(
            result.metadata.unwrap().aggregations,
            ["avg", "count", "count", "sum", "max"]
        );
    }

    #[tokio::test]
    async fn test_group_by_without_aggregates_counts() {
        let result = executor(three_machines())
            .execute_str("Get Group from all machines group by Group")
            .await
            .unwrap();

        assert_eq!(result.headers(), ["Group", "count()"]);
        assert_eq!(
            result.rows(),
            [
                vec![Cell::from("Laptops"), Cell::Number(2.0)],
                vec![Cell::from("Data Center Servers"), Cell::Number(1.0)],
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_group_key_reads_null() {
        let mut records = three_machines();
        records[2].group_name = None;
        let result = executor(records)
            .execute(
                &Query::select(&["Group"])
                    .aggregate(AggregateFunction::Count, None)
                    .group_by(&["Group"])
                    .build(),
            )
            .await
            .unwrap();

        assert_eq!(result.rows()[1][0], Cell::from("null"));
    }

    #[tokio::test]
    async fn test_unknown_group_column_warns() {
        let query = Query::select(&[])
            .aggregate(AggregateFunction::Count, None)
            .group_by(&["Favourite Colour"])
            .build();
        let result = executor(three_machines()).execute(&query).await.unwrap();

        assert!(result.ok);
        assert!(result.rows().is_empty());
        assert_eq!(result.warnings[0].severity, Severity::Error);
        assert_eq!(
            result.warnings[0].message,
            "Unknown group by column: Favourite Colour"
        );
    }

    #[tokio::test]
    async fn test_contains_and_does_not_contain_partition() {
        let records = sample_records();
        let executor = executor(records.clone());

        for needle in ["Windows", "mac", "11", "zzz"] {
            let contains = executor
                .execute_str(&format!(
                    "Get Computer Name from all machines where OS Platform contains \"{}\"",
                    needle
                ))
                .await
                .unwrap();
            let excludes = executor
                .execute_str(&format!(
                    "Get Computer Name from all machines where OS Platform does not contain \"{}\"",
                    needle
                ))
                .await
                .unwrap();

            assert_eq!(
                contains.rows().len() + excludes.rows().len(),
                records.len(),
                "needle {}",
                needle
            );
            for row in contains.rows() {
                assert!(!excludes.rows().contains(row));
            }
        }
    }

    #[test]
    fn test_null_values_satisfy_only_negated_operators() {
        let target = FilterValue::from("x");
        assert!(matches_filter(FieldValue::Null, FilterOperator::DoesNotContain, &target));
        assert!(matches_filter(FieldValue::Null, FilterOperator::NotEquals, &target));
        assert!(!matches_filter(FieldValue::Null, FilterOperator::Contains, &target));
        assert!(!matches_filter(FieldValue::Null, FilterOperator::GreaterThan, &FilterValue::Number(0.0)));
    }

    #[test]
    fn test_text_matching_is_case_insensitive() {
        let windows = FieldValue::Text("Windows 10");
        assert!(matches_filter(windows, FilterOperator::Contains, &"windows".into()));
        assert!(matches_filter(windows, FilterOperator::Equals, &"WINDOWS 10".into()));
        assert!(matches_filter(windows, FilterOperator::StartsWith, &"win".into()));
        assert!(!matches_filter(windows, FilterOperator::EndsWith, &"11".into()));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(parse_number(" 42.5 "), Some(42.5));
        assert_eq!(parse_number(""), Some(0.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
        assert!(matches_filter(
            FieldValue::Text("85"),
            FilterOperator::GreaterThan,
            &FilterValue::from("80")
        ));
        assert!(!matches_filter(
            FieldValue::Text("n/a"),
            FilterOperator::LessThan,
            &FilterValue::Number(100.0)
        ));
    }

    #[tokio::test]
    async fn test_filter_warnings() {
        let query = Query::select(&["Computer Name"])
            .filter("Shoe Size", FilterOperator::Equals, "9")
            .filter("OS Platform", FilterOperator::GreaterThan, 5.0)
            .build();
        let result = executor(three_machines()).execute(&query).await.unwrap();

        let messages: Vec<&str> = result.warnings.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "Unknown field: Shoe Size",
                "Operator 'greater_than' may not be compatible with field 'OS Platform'",
            ]
        );
        // The incompatible filter still runs and matches nothing
        assert!(result.rows().is_empty());
    }

    #[tokio::test]
    async fn test_sort_is_stable_with_nulls() {
        let records = vec![
            machine("A", "g", "os", Some(50.0), 0.5),
            machine("B", "g", "os", None, 0.5),
            machine("C", "g", "os", Some(50.0), 0.5),
            machine("D", "g", "os", Some(10.0), 0.5),
            machine("E", "g", "os", Some(50.0), 0.5),
        ];
        let executor = executor(records);

        let asc = executor
            .execute_str("Get Computer Name, CPU Percent from all machines order by CPU Percent asc")
            .await
            .unwrap();
        let names: Vec<String> = asc.column("Computer Name").iter().map(|c| c.to_string()).collect();
        assert_eq!(names, ["B", "D", "A", "C", "E"]);

        let desc = executor
            .execute_str("Get Computer Name, CPU Percent from all machines order by CPU Percent desc")
            .await
            .unwrap();
        let names: Vec<String> = desc.column("Computer Name").iter().map(|c| c.to_string()).collect();
        assert_eq!(names, ["A", "C", "E", "D", "B"]);
        assert_eq!(desc.metadata.unwrap().order_dir, "desc");
    }

    #[tokio::test]
    async fn test_unknown_sort_key_is_skipped() {
        let options = ParserOptions {
            validate_semantics: false,
            ..Default::default()
        };
        let query = parse_with_options(
            "Get Computer Name from all machines order by Memory GB",
            options,
        )
        .unwrap();
        let result = executor(three_machines()).execute(&query).await.unwrap();

        assert_eq!(result.rows().len(), 3);
        assert_eq!(result.rows()[0][0], Cell::from("WKS-1"));
        assert_eq!(result.warnings[0].message, "Unknown order by column: Memory GB");
    }

    #[tokio::test]
    async fn test_projection_formats_values() {
        let mut records = three_machines();
        records[0].memory_gb = Some(15.98765);
        records[0].last_seen = chrono::NaiveDate::from_ymd_opt(2024, 5, 20);
        let result = executor(records)
            .execute_str("Get Memory GB, Last Seen, Shoe Size from all machines limit 1")
            .await
            .unwrap();

        assert_eq!(
            result.rows()[0],
            vec![Cell::Number(15.988), Cell::from("2024-05-20"), Cell::Null]
        );
        assert_eq!(result.warnings[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_csv_output() {
        let executor = executor(three_machines()).with_options(ExecutorOptions {
            format: OutputFormat::Csv,
            ..Default::default()
        });
        let result = executor
            .execute_str("Get Computer Name, CPU Percent from all machines")
            .await
            .unwrap();

        assert_eq!(
            result.csv.as_deref(),
            Some("Computer Name,CPU Percent\nWKS-1,91\nWKS-2,\nSRV-1,42")
        );
    }

    #[tokio::test]
    async fn test_explain() {
        let executor = executor(sample_records()).with_options(ExecutorOptions {
            explain_only: true,
            ..Default::default()
        });
        let query = parse(
            "Get Computer Name, CPU Percent from all machines where CPU Percent is greater than 50 \
             order by CPU Percent desc limit 5",
        )
        .unwrap();
        let result = executor.execute(&query).await.unwrap();

        assert_eq!(result.headers(), EXPLAIN_HEADERS);
        assert_eq!(result.row_count, Some(4));
        assert_eq!(result.rows()[0][0], Cell::from("scan"));
        assert_eq!(result.rows()[0][2], Cell::Number(11.0));
        assert_eq!(result.rows()[3][0], Cell::from("      limit"));
    }

    #[tokio::test]
    async fn test_row_limit() {
        let executor = executor(sample_records()).with_options(ExecutorOptions {
            max_rows: 5,
            ..Default::default()
        });

        let err = executor
            .execute_str("Get Computer Name from all machines")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("ROW_LIMIT"));

        let limited = executor
            .execute_str("Get Computer Name from all machines limit 5")
            .await
            .unwrap();
        assert_eq!(limited.rows().len(), 5);
    }

    #[tokio::test]
    async fn test_timeout() {
        let records = crate::source::GeneratedSource::new(2000).with_seed(1).generate();
        let executor = QueryExecutor::new(
            Arc::new(records),
            ExecutorOptions {
                timeout: Duration::from_nanos(1),
                ..Default::default()
            },
        );

        let err = executor
            .execute_str("Get Computer Name from all machines where CPU Percent is greater than 10")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("TIMEOUT"));
        assert_eq!(err.kind(), "ExecutionError");
    }
}
