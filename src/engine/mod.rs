//! Query Engine
//!
//! Entry point that ties parsing, execution and caching together, and keeps
//! the saved-query and template library.
//!
//! # Example
//!
//! ```rust,no_run
//! use fleetquery::engine::{QueryEngine, QueryOptions};
//! use fleetquery::source::sample_records;
//!
//! # async fn run() {
//! let engine = QueryEngine::builder().records(sample_records()).build();
//! let result = engine
//!     .query("Get Computer Name from group \"laptops\"", &QueryOptions::default())
//!     .await;
//! println!("{}", result.to_table());
//! # }
//! ```

mod library;

pub use library::{
    default_templates, ParameterType, QueryLibrary, QueryTemplate, SavedQuery, TemplateParameter,
};

use crate::cache::{CacheManager, CacheStatistics, PruneReport, ResultKey};
use crate::config::{CacheConfig, Config};
use crate::query::{
    self, fields, ExecutionMetrics, ExecutorOptions, OutputFormat, ParserOptions, Query,
    QueryError, QueryExecutor, QueryResult, ResultSet, Sensor,
};
use crate::source::MachineRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Engine-wide settings
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub parser: ParserOptions,
    pub executor: ExecutorOptions,
    pub cache: CacheConfig,
}

impl EngineOptions {
    pub fn from_config(config: &Config, format: OutputFormat) -> Self {
        Self {
            parser: ParserOptions::default(),
            executor: config.executor.options(format),
            cache: config.cache.clone(),
        }
    }
}

/// Per-call settings
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Read and write the result cache
    pub use_cache: bool,
    /// Caller the cached result belongs to
    pub owner: Option<String>,
    /// Overrides the engine's output format
    pub format: Option<OutputFormat>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            owner: None,
            format: None,
        }
    }
}

/// Normalise query text: trim, collapse whitespace outside quotes and
/// capitalise a leading `get`
pub fn normalize_query(question: &str) -> String {
    let mut out = String::with_capacity(question.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut pending_space = false;

    for c in question.trim().chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }

    let starts_with_get = out
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("get "));
    if starts_with_get {
        out.replace_range(..4, "Get ");
    }
    out
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

static NEXT_DATASET: AtomicU64 = AtomicU64::new(1);

/// A record set tagged with an id unique within the process. Cached results
/// are keyed by the id, so they never outlive or cross the records they were
/// computed from.
#[derive(Debug, Clone)]
struct Dataset {
    id: u64,
    records: Arc<Vec<MachineRecord>>,
}

impl Dataset {
    fn new(records: Vec<MachineRecord>) -> Self {
        Self {
            id: NEXT_DATASET.fetch_add(1, Ordering::Relaxed),
            records: Arc::new(records),
        }
    }
}

/// The query engine
pub struct QueryEngine {
    data: tokio::sync::RwLock<Dataset>,
    cache: Arc<CacheManager>,
    library: RwLock<QueryLibrary>,
    options: EngineOptions,
}

impl QueryEngine {
    /// Create an engine over `records` with its own caches
    pub fn new(records: Vec<MachineRecord>, options: EngineOptions) -> Self {
        let cache = Arc::new(CacheManager::new(&options.cache));
        Self::with_cache(records, options, cache)
    }

    /// Create an engine sharing an existing cache manager
    pub fn with_cache(
        records: Vec<MachineRecord>,
        options: EngineOptions,
        cache: Arc<CacheManager>,
    ) -> Self {
        tracing::info!(
            records = records.len(),
            cache_enabled = cache.is_enabled(),
            "Query engine ready"
        );
        Self {
            data: tokio::sync::RwLock::new(Dataset::new(records)),
            cache,
            library: RwLock::new(QueryLibrary::default()),
            options,
        }
    }

    pub fn builder() -> QueryEngineBuilder {
        QueryEngineBuilder::default()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Answer a question. Every failure is reported as a result with
    /// `ok: false` rather than an error.
    pub async fn query(&self, question: &str, options: &QueryOptions) -> ResultSet {
        let started = Instant::now();
        match self.try_query(question, options, started).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(kind = e.kind(), error = %e, "Query failed");
                ResultSet::failure(
                    &e,
                    ExecutionMetrics {
                        total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                        ..Default::default()
                    },
                )
            }
        }
    }

    async fn try_query(
        &self,
        question: &str,
        options: &QueryOptions,
        started: Instant,
    ) -> QueryResult<ResultSet> {
        if question.trim().is_empty() {
            return Err(QueryError::query("Question is required"));
        }

        let normalized = normalize_query(question);
        let format = options.format.unwrap_or(self.options.executor.format);
        let dataset = self.data.read().await.clone();
        let key = ResultKey::new(dataset.id, options.owner.as_deref(), format);

        if options.use_cache {
            if let Some(mut cached) = self.cache.get_result(&normalized, &key) {
                let execution = cached.execution.get_or_insert_with(Default::default);
                execution.cache_hit = true;
                execution.total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
                tracing::debug!(query = %normalized, "Result cache hit");
                return Ok(cached);
            }
        }

        let (ast, parse_time_ms) = self.parse_timed(question, &normalized)?;

        let executor = QueryExecutor::new(
            dataset.records,
            ExecutorOptions {
                format,
                ..self.options.executor.clone()
            },
        );
        let mut result = executor.execute(&ast).await?;

        if let Some(execution) = result.execution.as_mut() {
            execution.parse_time_ms = parse_time_ms;
            execution.total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        }

        if options.use_cache {
            // Holding the read lock keeps set_data from swapping and clearing
            // between the check and the store
            let current = self.data.read().await;
            if current.id == dataset.id {
                self.cache.set_result(&normalized, &key, &result);
            } else {
                tracing::debug!(query = %normalized, "Data replaced during query, result not cached");
            }
        }

        Ok(result)
    }

    /// Parse `question` as the caller wrote it, so error positions point into
    /// their text. The normalized form is only the cache key.
    fn parse_timed(&self, question: &str, normalized: &str) -> QueryResult<(Arc<Query>, f64)> {
        if let Some(ast) = self.cache.get_parsed(normalized) {
            return Ok((ast, 0.0));
        }

        let started = Instant::now();
        let ast = Arc::new(query::parse_with_options(
            question,
            self.options.parser.clone(),
        )?);
        let parse_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.cache.set_parsed(normalized, Arc::clone(&ast));
        Ok((ast, parse_time_ms))
    }

    /// Parse a question without executing it
    pub fn parse(&self, question: &str) -> QueryResult<Arc<Query>> {
        if question.trim().is_empty() {
            return Err(QueryError::query("Question is required"));
        }
        self.parse_timed(question, &normalize_query(question))
            .map(|(ast, _)| ast)
    }

    /// Execution plan for a question
    pub async fn explain(&self, question: &str) -> QueryResult<ResultSet> {
        let ast = self.parse(question)?;
        let executor = QueryExecutor::new(self.data().await, self.options.executor.clone());
        Ok(executor.explain(&ast))
    }

    // Saved queries

    pub fn save_query(
        &self,
        name: &str,
        question: &str,
        description: Option<&str>,
    ) -> SavedQuery {
        let mut saved = SavedQuery::new(name, question);
        saved.description = description.map(str::to_string);
        write(&self.library).save(saved)
    }

    pub fn get_saved_query(&self, name: &str) -> Option<SavedQuery> {
        read(&self.library).get_saved(name).cloned()
    }

    pub fn list_saved_queries(&self) -> Vec<SavedQuery> {
        read(&self.library).list_saved().to_vec()
    }

    pub fn delete_saved_query(&self, name: &str) -> bool {
        write(&self.library).delete_saved(name).is_some()
    }

    /// Run a saved query and update its execution statistics
    pub async fn run_saved_query(
        &self,
        name: &str,
        options: &QueryOptions,
    ) -> QueryResult<ResultSet> {
        let question = self
            .get_saved_query(name)
            .map(|s| s.question)
            .ok_or_else(|| QueryError::query(format!("No saved query found with name: {}", name)))?;

        let started = Instant::now();
        let result = self.query(&question, options).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if let Some(saved) = write(&self.library).get_saved_mut(name) {
            saved.record_execution(elapsed_ms);
        }
        Ok(result)
    }

    // Templates

    pub fn add_template(&self, template: QueryTemplate) {
        write(&self.library).add_template(template);
    }

    pub fn get_template(&self, id: &str) -> Option<QueryTemplate> {
        read(&self.library).get_template(id).cloned()
    }

    pub fn list_templates(&self) -> Vec<QueryTemplate> {
        read(&self.library).list_templates().to_vec()
    }

    pub fn apply_template(&self, id: &str, params: &HashMap<String, String>) -> QueryResult<String> {
        read(&self.library).apply_template(id, params)
    }

    /// Apply a template and run the resulting query
    pub async fn run_template(
        &self,
        id: &str,
        params: &HashMap<String, String>,
        options: &QueryOptions,
    ) -> QueryResult<ResultSet> {
        let question = self.apply_template(id, params)?;
        Ok(self.query(&question, options).await)
    }

    /// Serialize saved queries and templates as JSON
    pub fn export_library(&self) -> QueryResult<String> {
        read(&self.library).export()
    }

    pub fn import_library(&self, data: &str) -> QueryResult<()> {
        write(&self.library).import(data)
    }

    // Data and catalog

    /// Replace the record set. Cached results describe the old records, so
    /// every cache is cleared.
    pub async fn set_data(&self, records: Vec<MachineRecord>) {
        let count = records.len();
        let mut data = self.data.write().await;
        *data = Dataset::new(records);
        self.cache.clear_all();
        tracing::info!(records = count, dataset = data.id, "Replaced engine data");
    }

    pub async fn data(&self) -> Arc<Vec<MachineRecord>> {
        Arc::clone(&self.data.read().await.records)
    }

    /// Id of the current record set. Changes on every [`set_data`](Self::set_data).
    pub async fn dataset_id(&self) -> u64 {
        self.data.read().await.id
    }

    pub fn field_suggestions(&self) -> Vec<&'static str> {
        fields::all_field_names()
    }

    pub fn sensors_catalog(&self) -> &'static [Sensor] {
        fields::SENSORS_CATALOG
    }

    pub fn aggregate_functions(&self) -> &'static [&'static str] {
        &fields::AGGREGATE_FUNCTIONS
    }

    // Cache

    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    pub fn prune_cache(&self) -> PruneReport {
        self.cache.prune_expired()
    }
}

/// Builder for [`QueryEngine`]
#[derive(Default)]
pub struct QueryEngineBuilder {
    records: Option<Vec<MachineRecord>>,
    options: EngineOptions,
    cache: Option<Arc<CacheManager>>,
}

impl QueryEngineBuilder {
    /// Records to query. Defaults to the built-in sample fleet.
    pub fn records(mut self, records: Vec<MachineRecord>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn parser_options(mut self, parser: ParserOptions) -> Self {
        self.options.parser = parser;
        self
    }

    pub fn executor_options(mut self, executor: ExecutorOptions) -> Self {
        self.options.executor = executor;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.options.cache.enabled = enabled;
        self
    }

    /// Share a cache manager with other engines
    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> QueryEngine {
        let records = self
            .records
            .unwrap_or_else(crate::source::sample_records);
        match self.cache {
            Some(cache) => QueryEngine::with_cache(records, self.options, cache),
            None => QueryEngine::new(records, self.options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Cell;
    use crate::source::sample_records;

    fn engine() -> QueryEngine {
        QueryEngine::builder().records(sample_records()).build()
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("  get   Computer Name\n from  all machines "),
            "Get Computer Name from all machines"
        );
        assert_eq!(
            normalize_query("GET x from group \"Two  Spaces\" where a equals 'b  c'"),
            "Get x from group \"Two  Spaces\" where a equals 'b  c'"
        );
        assert_eq!(normalize_query("getaway"), "getaway");
    }

    #[tokio::test]
    async fn test_query_three_records() {
        let engine = QueryEngine::builder()
            .records(sample_records().into_iter().take(3).collect())
            .build();
        let result = engine
            .query("Get Computer Name from all machines", &QueryOptions::default())
            .await;

        assert!(result.ok);
        assert_eq!(result.headers(), ["Computer Name"]);
        assert_eq!(result.row_count, Some(3));
        assert!(!result.cached);
    }

    #[tokio::test]
    async fn test_result_cache_hit() {
        let engine = engine();
        let options = QueryOptions::default();

        let first = engine.query("Get Computer Name from all machines", &options).await;
        assert!(!first.execution.as_ref().unwrap().cache_hit);

        let second = engine
            .query("get   Computer Name from all machines", &options)
            .await;
        assert!(second.cached);
        assert!(second.execution.as_ref().unwrap().cache_hit);
        assert_eq!(second.rows(), first.rows());

        let stats = engine.cache_statistics();
        assert_eq!(stats.results.hits, 1);
        assert_eq!(stats.parsed.size, 1);
    }

    #[tokio::test]
    async fn test_bypassing_cache() {
        let engine = engine();
        let options = QueryOptions {
            use_cache: false,
            ..Default::default()
        };
        engine.query("Get Computer Name from all machines", &options).await;
        let again = engine.query("Get Computer Name from all machines", &options).await;

        assert!(!again.cached);
        assert_eq!(engine.cache_statistics().results.size, 0);
    }

    #[tokio::test]
    async fn test_errors_become_failed_results() {
        let engine = engine();

        let result = engine
            .query("Select Computer Name", &QueryOptions::default())
            .await;
        assert!(!result.ok);
        assert!(result.error.is_some());
        assert_eq!(result.error_position, Some(0));
        assert!(result.rows.is_none());

        let empty = engine.query("   ", &QueryOptions::default()).await;
        assert_eq!(empty.error.as_deref(), Some("Question is required"));
    }

    #[tokio::test]
    async fn test_compliance_by_group() {
        let engine = engine();
        let result = engine
            .query(
                "Get avg(Compliance Score), count() from all machines group by Group",
                &QueryOptions::default(),
            )
            .await;

        assert!(result.ok);
        let servers = result
            .rows()
            .iter()
            .find(|r| r[0] == Cell::from("Data Center Servers"))
            .unwrap();
        // 0.95, 0.89 and 0.91
        assert_eq!(servers[1], Cell::Number(0.92));
        assert_eq!(servers[2], Cell::Number(3.0));
    }

    #[tokio::test]
    async fn test_set_data_clears_cache() {
        let engine = engine();
        let options = QueryOptions::default();
        engine.query("Get Computer Name from all machines", &options).await;

        engine
            .set_data(vec![MachineRecord::named("ONLY-ONE")])
            .await;
        let result = engine.query("Get Computer Name from all machines", &options).await;

        assert!(!result.cached);
        assert_eq!(result.rows(), [vec![Cell::from("ONLY-ONE")]]);
        assert_eq!(engine.data().await.len(), 1);
    }

    #[tokio::test]
    async fn test_saved_queries() {
        let engine = engine();
        engine.save_query("Servers", "Get Computer Name from group \"servers\"", None);

        let result = engine
            .run_saved_query("servers", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.row_count, Some(3));

        engine
            .run_saved_query("SERVERS", &QueryOptions::default())
            .await
            .unwrap();
        let saved = engine.get_saved_query("Servers").unwrap();
        assert_eq!(saved.execution_count, 2);
        assert!(saved.average_time_ms.is_some());

        let err = engine
            .run_saved_query("missing", &QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No saved query found with name: missing");

        assert!(engine.delete_saved_query("servers"));
        assert!(engine.list_saved_queries().is_empty());
    }

    #[tokio::test]
    async fn test_run_template() {
        let engine = engine();
        let params = HashMap::from([("threshold".to_string(), "60".to_string())]);
        let result = engine
            .run_template("high-cpu", &params, &QueryOptions::default())
            .await
            .unwrap();

        assert!(result.ok);
        let names: Vec<String> = result
            .column("Computer Name")
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(names, ["LAPTOP-002", "ENG-LAB-01"]);
    }

    #[tokio::test]
    async fn test_explain() {
        let engine = engine();
        let result = engine
            .explain("Get Computer Name from all machines limit 2")
            .await
            .unwrap();

        assert_eq!(result.headers()[0], "Operation");
        assert_eq!(result.row_count, Some(2));
        assert!(engine.explain("Get").await.is_err());
    }

    #[tokio::test]
    async fn test_csv_format_is_cached_separately() {
        let engine = engine();
        let json = engine
            .query("Get Computer Name from all machines limit 1", &QueryOptions::default())
            .await;
        let csv = engine
            .query(
                "Get Computer Name from all machines limit 1",
                &QueryOptions {
                    format: Some(OutputFormat::Csv),
                    ..Default::default()
                },
            )
            .await;

        assert!(json.csv.is_none());
        assert!(!csv.cached);
        assert_eq!(csv.csv.as_deref(), Some("Computer Name\nLAPTOP-001"));
    }

    #[tokio::test]
    async fn test_shared_cache_keeps_results_apart() {
        let cache = Arc::new(CacheManager::default());
        let a = QueryEngine::builder().cache(Arc::clone(&cache)).build();
        let b = QueryEngine::builder()
            .records(vec![MachineRecord::named("ONLY-B")])
            .cache(Arc::clone(&cache))
            .build();

        let options = QueryOptions::default();
        let from_a = a.query("Get Computer Name from all machines", &options).await;
        let from_b = b.query("Get Computer Name from all machines", &options).await;

        assert_eq!(from_a.row_count, Some(11));
        assert!(!from_b.cached);
        assert_eq!(from_b.rows(), [vec![Cell::from("ONLY-B")]]);

        // Parsed queries do not depend on the records and are shared
        assert_eq!(cache.statistics().parsed.hits, 1);
    }

    #[tokio::test]
    async fn test_late_store_from_replaced_data_is_never_served() {
        let engine = engine();
        let options = QueryOptions::default();
        let question = "Get Computer Name from all machines";

        let old_id = engine.dataset_id().await;
        let old = engine.query(question, &options).await;
        engine
            .set_data(vec![MachineRecord::named("ONLY-ONE")])
            .await;
        assert_ne!(engine.dataset_id().await, old_id);

        // A query that read the old records finishes after the swap
        engine.cache().set_result(
            &normalize_query(question),
            &ResultKey::new(old_id, None, OutputFormat::Json),
            &old,
        );

        let result = engine.query(question, &options).await;
        assert!(!result.cached);
        assert_eq!(result.rows(), [vec![Cell::from("ONLY-ONE")]]);
    }

    #[tokio::test]
    async fn test_error_position_points_into_original_text() {
        let engine = engine();
        let question = "   Get   Computer Name   where CPU Percent is greater than 5";

        let result = engine.query(question, &QueryOptions::default()).await;
        let direct = query::parse(question).unwrap_err();

        assert!(!result.ok);
        assert_eq!(result.error_position, Some(25));
        assert_eq!(result.error_position, direct.position());
        assert_eq!(&question[25..30], "where");
    }

    #[test]
    fn test_catalog() {
        let engine = engine();
        assert!(engine.field_suggestions().contains(&"cpu percent"));
        assert_eq!(engine.sensors_catalog().len(), 12);
        assert_eq!(engine.aggregate_functions().len(), 5);
    }
}
