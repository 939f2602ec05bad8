//! Query error types
//!
//! Defines all error conditions that can occur during query lexing, parsing and
//! execution. The three variants form a flat taxonomy: a generic query error, a
//! parse error carrying the offending token's position, and an execution error
//! carrying an optional short code.

use crate::query::token::Token;
use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Malformed top-level input (empty question, unknown saved query, ...)
    #[error("{message}")]
    Query {
        message: String,
        position: Option<usize>,
    },

    /// Grammar violation raised by the lexer or parser
    #[error("{message}")]
    Parse {
        message: String,
        position: Option<usize>,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// Failure while executing a query plan
    #[error("{message}")]
    Execution {
        message: String,
        code: Option<String>,
    },
}

impl QueryError {
    /// Create a generic query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            position: None,
        }
    }

    /// Create a parse error located at a token
    pub fn parse_at(message: impl Into<String>, token: &Token) -> Self {
        Self::Parse {
            message: message.into(),
            position: Some(token.position),
            line: Some(token.line),
            column: Some(token.column),
        }
    }

    /// Create a parse error with no source location
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            position: None,
            line: None,
            column: None,
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            code: None,
        }
    }

    /// Create an execution error with a short code
    pub fn execution_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Source offset of the error, when known
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Query { position, .. } | Self::Parse { position, .. } => *position,
            Self::Execution { .. } => None,
        }
    }

    /// Execution error code, when present
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Execution { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Short name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Query { .. } => "QueryError",
            Self::Parse { .. } => "ParseError",
            Self::Execution { .. } => "ExecutionError",
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
