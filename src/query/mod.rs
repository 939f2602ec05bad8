//! Fleet Query Engine
//!
//! Provides a natural-language query language over machine inventory records:
//!
//! - **Lexer**: Split query text into tokens, recognising multi-word phrases
//! - **Fields**: Registry of sensor names, group aliases and field types
//! - **AST**: Query abstract syntax tree types
//! - **Parser**: Parse token streams into AST
//! - **Plan**: Cost and row estimates for explain output
//! - **Executor**: Execute queries against a record set
//!
//! # Query Language
//!
//! ```text
//! Get column [, column | and column | fn(column) ...]
//! from all machines | group "name"
//! [where field operator value [and ...]]
//! [group by column [, ...]]
//! [order by column [asc|desc] [, ...]]
//! [limit n]
//! ```
//!
//! # Examples
//!
//! ## Using Query Builder
//!
//! ```rust,ignore
//! use fleetquery::query::{Query, QueryExecutor, FilterOperator, SortDirection};
//!
//! let query = Query::select(&["Computer Name", "CPU Percent"])
//!     .from_group("Laptops")
//!     .filter("CPU Percent", FilterOperator::GreaterThan, 80.0)
//!     .order_by("CPU Percent", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//!
//! let result = executor.execute(&query).await?;
//! ```
//!
//! ## Using Query String
//!
//! ```rust,ignore
//! let result = executor.execute_str(
//!     "Get avg(Compliance Score), count() from all machines group by Group"
//! ).await?;
//! ```

mod ast;
mod error;
mod executor;
pub mod fields;
mod lexer;
mod parser;
mod plan;
mod result;
mod token;

pub use ast::{
    round_to, Aggregate, AggregateFunction, Column, Filter, FilterOperator, FilterValue, From,
    GroupBy, Limit, OrderBy, OrderColumn, Query, QueryBuilder, Scope, ScopeType, Select,
    SortDirection, SourceLocation, Where,
};
pub use error::{QueryError, QueryResult};
pub use executor::{ExecutorOptions, QueryExecutor};
pub use fields::{FieldMapping, FieldType, Sensor};
pub use lexer::{tokenize, Lexer};
pub use parser::{parse, parse_with_options, Parser, ParserOptions};
pub use plan::{PlanNode, PlanNodeType, EXPLAIN_HEADERS};
pub use result::{
    escape_csv, format_csv, Cell, ExecutionMetrics, OutputFormat, ResultMetadata, ResultSet,
    Severity, Warning,
};
pub use token::{Token, TokenType};
