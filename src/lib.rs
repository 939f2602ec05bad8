//! # Fleetquery
//!
//! Fleet Query Engine - answers constrained English questions about a fleet
//! of managed machines.
//!
//! ## Features
//!
//! - **Natural query language**: `Get Computer Name, CPU Percent from all machines
//!   where CPU Percent is greater than 60 order by CPU Percent desc`
//! - **Aggregation**: `count()`, `min()`, `max()`, `avg()` and `sum()` with `group by`
//! - **Execution plans**: cost-annotated explain output
//! - **Two-tier caching**: parsed queries and results, LRU with TTL
//! - **Query library**: saved queries and parameterized templates
//!
//! ## Modules
//!
//! - [`query`]: Lexer, parser, executor and result types
//! - [`cache`]: LRU caches for parsed queries and results
//! - [`engine`]: Query engine facade with the query library
//! - [`source`]: Machine records and where they come from
//! - [`config`]: Configuration loading
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleetquery::{QueryEngine, QueryOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Built-in sample fleet
//!     let engine = QueryEngine::builder().build();
//!
//!     let result = engine
//!         .query(
//!             "Get avg(Compliance Score), count() from all machines group by Group",
//!             &QueryOptions::default(),
//!         )
//!         .await;
//!
//!     println!("{}", result.to_table());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod query;
pub mod source;

// Re-export top-level types for convenience
pub use query::{
    parse, tokenize, Cell, ExecutorOptions, OutputFormat, ParserOptions, Query, QueryError,
    QueryExecutor, QueryResult, ResultSet, Warning,
};

pub use engine::{
    EngineOptions, QueryEngine, QueryEngineBuilder, QueryOptions, QueryTemplate, SavedQuery,
};

pub use cache::{CacheManager, CacheStatistics};

pub use source::{load_records, sample_records, MachineRecord, RecordSource, SourceError};

pub use config::{Config, ConfigError};
