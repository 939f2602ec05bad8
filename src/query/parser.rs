//! Query Parser
//!
//! Recursive-descent parser turning a token stream into a [`Query`] AST.
//!
//! # Supported Syntax
//!
//! ```text
//! Get <column|aggregate> [, <column|aggregate> ...]
//! from (all [machines] | group "<name>")
//! [where|with <field> <operator> <value> [and ...]]
//! [group by <column> [, <column> ...]]
//! [order by <column> [asc|desc] [, ...]]
//! [limit <n>]
//! ```
//!
//! # Examples
//!
//! ```text
//! Get Computer Name from all machines
//! Get Computer Name and CPU Percent from group servers where CPU Percent is greater than 80
//! Get Location, count() from all machines group by Location order by Location desc
//! ```

use crate::query::ast::{
    Aggregate, AggregateFunction, Column, Filter, FilterOperator, FilterValue, GroupBy, Limit,
    OrderBy, OrderColumn, Query, Scope, ScopeType, Select, SortDirection, SourceLocation, Where,
};
use crate::query::ast;
use crate::query::error::{QueryError, QueryResult};
use crate::query::fields;
use crate::query::lexer::Lexer;
use crate::query::token::{Token, TokenType};

/// Parser behaviour switches
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Check GROUP BY / ORDER BY columns against the select list
    pub validate_semantics: bool,
    /// Reject inputs producing more tokens than this
    pub max_tokens: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            validate_semantics: true,
            max_tokens: 10_000,
        }
    }
}

/// Where a multi-word name ends.
///
/// Names are built from consecutive identifiers; a name stops at any token in
/// `stop` and at identifiers spelled like one of `stop_words`.
struct Continuation {
    stop: &'static [TokenType],
    stop_words: &'static [&'static str],
}

const STRUCTURAL: &[TokenType] = &[
    TokenType::From,
    TokenType::Where,
    TokenType::With,
    TokenType::GroupBy,
    TokenType::OrderBy,
    TokenType::Limit,
    TokenType::And,
    TokenType::Comma,
    TokenType::Eof,
];

const COLUMN_NAME: Continuation = Continuation {
    stop: STRUCTURAL,
    stop_words: &[],
};

const ORDER_KEY: Continuation = Continuation {
    stop: STRUCTURAL,
    stop_words: &["asc", "desc"],
};

const GROUP_NAME: Continuation = Continuation {
    stop: &[
        TokenType::Where,
        TokenType::With,
        TokenType::GroupBy,
        TokenType::OrderBy,
        TokenType::Limit,
        TokenType::Eof,
    ],
    stop_words: &[],
};

const FILTER_VALUE: Continuation = Continuation {
    stop: &[
        TokenType::And,
        TokenType::GroupBy,
        TokenType::OrderBy,
        TokenType::Limit,
        TokenType::Eof,
    ],
    stop_words: &[],
};

/// A multi-word name and the tokens it spans
struct Name {
    text: String,
    location: SourceLocation,
}

/// Recursive-descent parser over lexer tokens
#[derive(Debug, Default)]
pub struct Parser {
    options: ParserOptions,
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ParserOptions) -> Self {
        Self {
            options,
            tokens: Vec::new(),
            current: 0,
        }
    }

    /// Parse a query string into an AST
    pub fn parse(&mut self, input: &str) -> QueryResult<Query> {
        self.tokens = Lexer::new(input).tokenize()?;
        self.current = 0;

        if self.tokens.len() > self.options.max_tokens {
            let token = &self.tokens[self.options.max_tokens];
            return Err(QueryError::parse_at(
                format!(
                    "Query exceeds the maximum of {} tokens",
                    self.options.max_tokens
                ),
                token,
            ));
        }

        let query = self.parse_query()?;

        if self.options.validate_semantics {
            validate(&query)?;
        }

        Ok(query)
    }

    /// Query ::= GET Select FROM Scope [WHERE Filters] [GroupBy] [OrderBy] [LIMIT n]
    fn parse_query(&mut self) -> QueryResult<Query> {
        let start = self.peek().clone();

        if !self.match_type(TokenType::Get) {
            return Err(QueryError::parse_at(
                "Query must start with \"Get\"",
                self.peek(),
            ));
        }

        let select = self.parse_select()?;

        if !self.match_type(TokenType::From) {
            return Err(QueryError::parse_at(
                "Expected \"from\" after column list",
                self.peek(),
            ));
        }

        let from = self.parse_from();

        let where_clause = if self.match_type(TokenType::Where) || self.match_type(TokenType::With)
        {
            Some(self.parse_where()?)
        } else {
            None
        };

        let group_by = if self.match_clause(TokenType::GroupBy, "group") {
            Some(self.parse_group_by()?)
        } else {
            None
        };

        let order_by = if self.match_clause(TokenType::OrderBy, "order") {
            Some(self.parse_order_by()?)
        } else {
            None
        };

        let limit = if self.match_type(TokenType::Limit) {
            Some(self.parse_limit()?)
        } else {
            None
        };

        if !self.check(TokenType::Eof) {
            let token = self.peek();
            return Err(QueryError::parse_at(
                format!("Unexpected token \"{}\"", token.value),
                token,
            ));
        }

        Ok(Query {
            select,
            from,
            where_clause,
            group_by,
            order_by,
            limit,
            location: Some(self.location_from(&start)),
        })
    }

    /// Select ::= (Column | Aggregate) ((COMMA | AND) (Column | Aggregate))*
    fn parse_select(&mut self) -> QueryResult<Select> {
        let start = self.peek().clone();
        let mut columns = Vec::new();
        let mut aggregates = Vec::new();

        loop {
            if self.peek().token_type.is_aggregate() {
                aggregates.push(self.parse_aggregate()?);
            } else if let Some(name) = self.parse_name(&COLUMN_NAME) {
                columns.push(Column {
                    name: name.text,
                    alias: None,
                    location: Some(name.location),
                });
            }

            if self.match_type(TokenType::Comma) {
                continue;
            }
            // "and" separates items unless it is the last word before "from"
            if self.check(TokenType::And) && !self.check_ahead(TokenType::From, 1) {
                self.advance();
                continue;
            }
            break;
        }

        if columns.is_empty() && aggregates.is_empty() {
            return Err(QueryError::parse_at(
                "Expected at least one column or aggregate",
                self.peek(),
            ));
        }

        Ok(Select {
            columns,
            aggregates,
            location: Some(self.location_from(&start)),
        })
    }

    /// Aggregate ::= (COUNT|MIN|MAX|AVG|SUM) ["(" [Column] ")"]
    fn parse_aggregate(&mut self) -> QueryResult<Aggregate> {
        let token = self.advance().clone();
        let function = match token.token_type {
            TokenType::Count => AggregateFunction::Count,
            TokenType::Min => AggregateFunction::Min,
            TokenType::Max => AggregateFunction::Max,
            TokenType::Avg => AggregateFunction::Avg,
            TokenType::Sum => AggregateFunction::Sum,
            _ => {
                return Err(QueryError::parse_at(
                    format!("Unknown aggregate function: {}", token.value),
                    &token,
                ))
            }
        };

        let mut column = None;
        if self.match_type(TokenType::LParen) {
            if !self.check(TokenType::RParen) {
                column = self.parse_name(&COLUMN_NAME).map(|n| n.text);
            }
            self.consume(TokenType::RParen, "Expected closing parenthesis")?;
        }

        Ok(Aggregate {
            function,
            column,
            location: Some(self.location_from(&token)),
        })
    }

    fn parse_from(&mut self) -> ast::From {
        let start = self.peek().clone();
        let scope = self.parse_scope();

        ast::From {
            scope,
            location: Some(self.location_from(&start)),
        }
    }

    /// Scope ::= "all" ["machines"] | "group" (STRING | name)
    ///
    /// Anything else leaves the tokens alone and targets all machines.
    fn parse_scope(&mut self) -> Scope {
        let start = self.peek().clone();

        if start.is_word("all") {
            self.advance();
            if self.peek().is_word("machines") {
                self.advance();
            }
            return Scope {
                scope_type: ScopeType::All,
                value: None,
                location: Some(self.location_from(&start)),
            };
        }

        if start.is_word("group") {
            self.advance();
            let name = if self.check(TokenType::String) {
                Some(self.advance().value.clone())
            } else {
                self.parse_name(&GROUP_NAME).map(|n| n.text)
            };

            return Scope {
                scope_type: ScopeType::Group,
                value: name.filter(|n| !n.is_empty()),
                location: Some(self.location_from(&start)),
            };
        }

        Scope {
            scope_type: ScopeType::All,
            value: None,
            location: Some(location_between(&start, &start)),
        }
    }

    /// Filters ::= Filter (AND Filter)*
    fn parse_where(&mut self) -> QueryResult<Where> {
        let start = self.previous().clone();
        let mut filters = vec![self.parse_filter()?];

        while self.match_type(TokenType::And) {
            filters.push(self.parse_filter()?);
        }

        Ok(Where {
            filters,
            location: Some(self.location_from(&start)),
        })
    }

    /// Filter ::= Column Operator (STRING | NUMBER | name)
    fn parse_filter(&mut self) -> QueryResult<Filter> {
        let start = self.peek().clone();

        let Some(field) = self.parse_name(&COLUMN_NAME) else {
            return Err(QueryError::parse_at(
                "Expected field name in filter",
                self.peek(),
            ));
        };

        let operator = self.parse_operator()?;

        let value = if self.check(TokenType::String) {
            FilterValue::Text(self.advance().value.clone())
        } else if self.check(TokenType::Number) {
            let token = self.advance().clone();
            let number = token
                .value
                .parse::<f64>()
                .map_err(|_| QueryError::parse_at("Invalid number", &token))?;
            FilterValue::Number(number)
        } else {
            let text = self
                .parse_name(&FILTER_VALUE)
                .map(|n| n.text)
                .unwrap_or_default();
            FilterValue::Text(text)
        };

        Ok(Filter {
            data_type: fields::field_type(&field.text),
            field: field.text,
            operator,
            value,
            location: Some(self.location_from(&start)),
        })
    }

    fn parse_operator(&mut self) -> QueryResult<FilterOperator> {
        let operator = match self.peek().token_type {
            TokenType::Contains => FilterOperator::Contains,
            TokenType::DoesNotContain => FilterOperator::DoesNotContain,
            TokenType::Equals => FilterOperator::Equals,
            TokenType::IsGreaterThan => FilterOperator::GreaterThan,
            TokenType::IsLessThan => FilterOperator::LessThan,
            TokenType::StartsWith => FilterOperator::StartsWith,
            TokenType::EndsWith => FilterOperator::EndsWith,
            _ => {
                return Err(QueryError::parse_at(
                    "Expected comparison operator",
                    self.peek(),
                ))
            }
        };
        self.advance();
        Ok(operator)
    }

    /// GroupBy ::= Column (COMMA Column)*, after the "group by" keyword
    fn parse_group_by(&mut self) -> QueryResult<GroupBy> {
        let start = self.previous().clone();
        let mut columns = Vec::new();

        loop {
            if let Some(name) = self.parse_name(&COLUMN_NAME) {
                columns.push(name.text);
            }
            if !self.match_type(TokenType::Comma) {
                break;
            }
        }

        if columns.is_empty() {
            return Err(QueryError::parse_at(
                "Expected column name after \"group by\"",
                self.peek(),
            ));
        }

        Ok(GroupBy {
            columns,
            location: Some(self.location_from(&start)),
        })
    }

    /// OrderBy ::= Column ["asc"|"desc"] (COMMA ...)*, after the "order by" keyword
    fn parse_order_by(&mut self) -> QueryResult<OrderBy> {
        let start = self.previous().clone();
        let mut columns = Vec::new();

        loop {
            if let Some(name) = self.parse_name(&ORDER_KEY) {
                let direction = if self.peek().is_word("desc") {
                    self.advance();
                    SortDirection::Desc
                } else if self.peek().is_word("asc") {
                    self.advance();
                    SortDirection::Asc
                } else {
                    SortDirection::Asc
                };
                columns.push(OrderColumn {
                    column: name.text,
                    direction,
                });
            }
            if !self.match_type(TokenType::Comma) {
                break;
            }
        }

        if columns.is_empty() {
            return Err(QueryError::parse_at(
                "Expected column name after \"order by\"",
                self.peek(),
            ));
        }

        Ok(OrderBy {
            columns,
            location: Some(self.location_from(&start)),
        })
    }

    fn parse_limit(&mut self) -> QueryResult<Limit> {
        let start = self.previous().clone();

        if !self.check(TokenType::Number) {
            return Err(QueryError::parse_at(
                "Expected number after limit",
                self.peek(),
            ));
        }

        let token = self.advance().clone();
        let whole = token.value.split('.').next().unwrap_or_default();
        let value = whole
            .parse::<usize>()
            .map_err(|_| QueryError::parse_at("Invalid limit", &token))?;

        Ok(Limit {
            value,
            location: Some(self.location_from(&start)),
        })
    }

    /// Join consecutive identifiers into one name
    fn parse_name(&mut self, rule: &Continuation) -> Option<Name> {
        let start = self.peek().clone();
        let mut words: Vec<String> = Vec::new();

        while self.check(TokenType::Identifier)
            && !rule
                .stop_words
                .iter()
                .any(|w| self.peek().value.eq_ignore_ascii_case(w))
        {
            words.push(self.advance().value.clone());
            if rule.stop.contains(&self.peek().token_type) {
                break;
            }
        }

        if words.is_empty() {
            return None;
        }

        Some(Name {
            text: words.join(" "),
            location: self.location_from(&start),
        })
    }

    // Token helpers

    fn peek(&self) -> &Token {
        let index = self.current.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.peek().token_type == token_type
    }

    fn check_ahead(&self, token_type: TokenType, offset: usize) -> bool {
        self.tokens
            .get(self.current + offset)
            .is_some_and(|t| t.token_type == token_type)
    }

    fn advance(&mut self) -> &Token {
        if !self.check(TokenType::Eof) {
            self.current += 1;
        }
        self.previous()
    }

    fn match_type(&mut self, token_type: TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Match a clause keyword, either as one phrase token or as the two
    /// identifiers `<word> by`
    fn match_clause(&mut self, token_type: TokenType, word: &str) -> bool {
        if self.match_type(token_type) {
            return true;
        }
        let next_is_by = self
            .tokens
            .get(self.current + 1)
            .is_some_and(|t| t.is_word("by"));
        if self.peek().is_word(word) && next_is_by {
            self.advance();
            self.advance();
            return true;
        }
        false
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> QueryResult<&Token> {
        if self.check(token_type) {
            return Ok(self.advance());
        }
        Err(QueryError::parse_at(message, self.peek()))
    }

    fn location_from(&self, start: &Token) -> SourceLocation {
        location_between(start, self.previous())
    }
}

fn location_between(start: &Token, end: &Token) -> SourceLocation {
    SourceLocation {
        start: start.position,
        end: end.end().max(start.position),
        line: start.line,
        column: start.column,
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn located(message: String, location: Option<SourceLocation>) -> QueryError {
    QueryError::Parse {
        message,
        position: location.map(|l| l.start),
        line: location.map(|l| l.line),
        column: location.map(|l| l.column),
    }
}

/// Every GROUP BY column must be selected unless the query aggregates; every
/// ORDER BY column must be selected or grouped.
fn validate(query: &Query) -> QueryResult<()> {
    let selected = |name: &str| query.select.columns.iter().any(|c| same_name(&c.name, name));

    if let Some(group_by) = &query.group_by {
        if query.select.aggregates.is_empty() {
            if let Some(column) = group_by.columns.iter().find(|c| !selected(c)) {
                return Err(located(
                    format!("GROUP BY column \"{}\" must appear in SELECT clause", column),
                    group_by.location,
                ));
            }
        }
    }

    if let Some(order_by) = &query.order_by {
        let grouped = |name: &str| {
            query
                .group_by
                .as_ref()
                .is_some_and(|g| g.columns.iter().any(|c| same_name(c, name)))
        };

        if let Some(key) = order_by
            .columns
            .iter()
            .find(|k| !selected(&k.column) && !grouped(&k.column))
        {
            return Err(located(
                format!(
                    "ORDER BY column \"{}\" must appear in SELECT or GROUP BY clause",
                    key.column
                ),
                order_by.location,
            ));
        }
    }

    Ok(())
}

/// Parse a query string with default options
pub fn parse(input: &str) -> QueryResult<Query> {
    Parser::new().parse(input)
}

/// Parse a query string with explicit options
pub fn parse_with_options(input: &str, options: ParserOptions) -> QueryResult<Query> {
    Parser::with_options(options).parse(input)
}
