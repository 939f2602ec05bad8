//! Query tokens
//!
//! Typed tokens produced by the lexer and consumed by the parser.

use serde::{Deserialize, Serialize};

/// Closed set of token types recognised by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    // Keywords
    Get,
    From,
    Where,
    With,
    GroupBy,
    OrderBy,
    Limit,
    And,

    // Comparison operators
    Contains,
    DoesNotContain,
    Equals,
    IsGreaterThan,
    IsLessThan,
    StartsWith,
    EndsWith,

    // Aggregates
    Count,
    Min,
    Max,
    Avg,
    Sum,

    // Literals
    Identifier,
    String,
    Number,

    // Punctuation
    Comma,
    LParen,
    RParen,
    Dot,

    // Sentinels
    Eof,
    Unknown,
}

impl TokenType {
    /// Whether this token is one of the aggregate function keywords
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Self::Count | Self::Min | Self::Max | Self::Avg | Self::Sum
        )
    }

    /// Whether this token is a comparison operator
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            Self::Contains
                | Self::DoesNotContain
                | Self::Equals
                | Self::IsGreaterThan
                | Self::IsLessThan
                | Self::StartsWith
                | Self::EndsWith
        )
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::From => "FROM",
            Self::Where => "WHERE",
            Self::With => "WITH",
            Self::GroupBy => "GROUP_BY",
            Self::OrderBy => "ORDER_BY",
            Self::Limit => "LIMIT",
            Self::And => "AND",
            Self::Contains => "CONTAINS",
            Self::DoesNotContain => "DOES_NOT_CONTAIN",
            Self::Equals => "EQUALS",
            Self::IsGreaterThan => "IS_GREATER_THAN",
            Self::IsLessThan => "IS_LESS_THAN",
            Self::StartsWith => "STARTS_WITH",
            Self::EndsWith => "ENDS_WITH",
            Self::Count => "COUNT",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
            Self::Sum => "SUM",
            Self::Identifier => "IDENTIFIER",
            Self::String => "STRING",
            Self::Number => "NUMBER",
            Self::Comma => "COMMA",
            Self::LParen => "LPAREN",
            Self::RParen => "RPAREN",
            Self::Dot => "DOT",
            Self::Eof => "EOF",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// A single lexical token with its source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: TokenType,
    pub value: String,
    /// Character offset of the first character
    pub position: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

impl Token {
    pub fn new(
        token_type: TokenType,
        value: impl Into<String>,
        position: usize,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            token_type,
            value: value.into(),
            position,
            line,
            column,
        }
    }

    /// Character offset one past the end of the token's value
    pub fn end(&self) -> usize {
        self.position + self.value.chars().count()
    }

    /// Case-insensitive comparison of the token's text
    pub fn is_word(&self, word: &str) -> bool {
        self.token_type == TokenType::Identifier && self.value.eq_ignore_ascii_case(word)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}) @ {}:{}",
            self.token_type, self.value, self.line, self.column
        )
    }
}
