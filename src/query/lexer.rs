//! Query Lexer
//!
//! Converts a raw question into a stream of typed tokens in a single
//! left-to-right scan.
//!
//! Multi-word operator phrases ("does not contain", "is greater than",
//! "group by", ...) are matched before anything else, so their words never end
//! up inside an identifier. Multi-word field names such as "Computer Name" are
//! recognised by looking ahead over space-separated words and keeping the
//! longest run that the field registry knows about.
//!
//! ```text
//! Get Computer Name from all machines where CPU Percent is greater than 80
//! GET IDENTIFIER(Computer Name) FROM IDENTIFIER(all) IDENTIFIER(machines)
//!     WHERE IDENTIFIER(CPU Percent) IS_GREATER_THAN NUMBER(80) EOF
//! ```

use nom::{
    bytes::complete::tag_no_case,
    character::complete::{char, digit1, multispace1, satisfy},
    combinator::{not, opt, recognize},
    sequence::pair,
    IResult,
};

use crate::query::error::{QueryError, QueryResult};
use crate::query::fields;
use crate::query::token::{Token, TokenType};

/// Operator and clause phrases, tried in order before any other rule
const PHRASES: &[(&[&str], TokenType)] = &[
    (&["does", "not", "contain"], TokenType::DoesNotContain),
    (&["is", "greater", "than"], TokenType::IsGreaterThan),
    (&["is", "less", "than"], TokenType::IsLessThan),
    (&["starts", "with"], TokenType::StartsWith),
    (&["ends", "with"], TokenType::EndsWith),
    (&["group", "by"], TokenType::GroupBy),
    (&["order", "by"], TokenType::OrderBy),
];

/// Longest field name in the registry, in words
const MAX_FIELD_WORDS: usize = 4;

/// Single-pass tokenizer over a query string
pub struct Lexer<'a> {
    input: &'a str,
    /// Byte offset into `input`
    offset: usize,
    /// Character offset into `input`
    position: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over the given input
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            position: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    /// Tokenize the whole input. The result always ends with an EOF token.
    pub fn tokenize(&mut self) -> QueryResult<Vec<Token>> {
        self.offset = 0;
        self.position = 0;
        self.line = 1;
        self.column = 1;
        self.tokens.clear();

        loop {
            self.skip_whitespace();
            if self.is_eof() {
                break;
            }
            if let Some(token) = self.next_token()? {
                self.tokens.push(token);
            }
        }

        let eof = Token::new(TokenType::Eof, "", self.position, self.line, self.column);
        self.tokens.push(eof);
        Ok(self.tokens.clone())
    }

    /// Tokens produced by the last call to [`Lexer::tokenize`]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// One token per line, for debugging
    pub fn format_tokens(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Scan the next token. Unknown characters are consumed and yield `None`.
    fn next_token(&mut self) -> QueryResult<Option<Token>> {
        let (position, line, column) = (self.position, self.line, self.column);

        if let Some((len, token_type)) = match_phrase(self.rest()) {
            let value = self.advance_bytes(len);
            return Ok(Some(Token::new(token_type, value, position, line, column)));
        }

        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            '"' | '\'' => self.read_string()?,
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_ascii_alphabetic() => self.read_word(),
            ',' => self.single(TokenType::Comma),
            '(' => self.single(TokenType::LParen),
            ')' => self.single(TokenType::RParen),
            '.' => self.single(TokenType::Dot),
            other => {
                self.advance_char();
                tracing::trace!(character = %other, position, "Skipping unknown character");
                return Ok(None);
            }
        };

        Ok(Some(token))
    }

    fn single(&mut self, token_type: TokenType) -> Token {
        let (position, line, column) = (self.position, self.line, self.column);
        let value = self.advance_bytes(self.peek().map(char::len_utf8).unwrap_or(0));
        Token::new(token_type, value, position, line, column)
    }

    /// Read a quoted string literal, resolving escape sequences
    fn read_string(&mut self) -> QueryResult<Token> {
        let (position, line, column) = (self.position, self.line, self.column);
        let quote = self.advance_char().unwrap_or('"');
        let mut value = String::new();

        loop {
            let Some(c) = self.advance_char() else {
                return Err(QueryError::Parse {
                    message: "Unterminated string literal".to_string(),
                    position: Some(position),
                    line: Some(line),
                    column: Some(column),
                });
            };

            if c == quote {
                break;
            }

            if c == '\\' {
                let Some(escaped) = self.advance_char() else {
                    continue;
                };
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                value.push(c);
            }
        }

        Ok(Token::new(TokenType::String, value, position, line, column))
    }

    /// Read an integer or decimal number
    fn read_number(&mut self) -> Token {
        let (position, line, column) = (self.position, self.line, self.column);
        let len = match number(self.rest()) {
            Ok((_, matched)) => matched.len(),
            Err(_) => 1,
        };
        let value = self.advance_bytes(len);
        Token::new(TokenType::Number, value, position, line, column)
    }

    /// Read a keyword, a single-word identifier, or a multi-word field name
    fn read_word(&mut self) -> Token {
        let (position, line, column) = (self.position, self.line, self.column);
        let rest = self.rest();
        let first_len = word_len(rest);

        if let Some((len, name)) = longest_field_name(rest, first_len) {
            self.advance_bytes(len);
            return Token::new(TokenType::Identifier, name, position, line, column);
        }

        let value = self.advance_bytes(first_len);
        let token_type = keyword(&value).unwrap_or(TokenType::Identifier);
        Token::new(token_type, value, position, line, column)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance_char();
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn is_eof(&self) -> bool {
        self.offset >= self.input.len()
    }

    fn advance_char(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        self.position += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Advance over `len` bytes, returning the consumed text
    fn advance_bytes(&mut self, len: usize) -> String {
        let end = self.offset + len;
        let consumed = &self.input[self.offset..end];
        while self.offset < end {
            self.advance_char();
        }
        consumed.to_string()
    }
}

/// Tokenize a query string
pub fn tokenize(input: &str) -> QueryResult<Vec<Token>> {
    Lexer::new(input).tokenize()
}

/// Map a single word to its keyword token type
fn keyword(word: &str) -> Option<TokenType> {
    match word.to_lowercase().as_str() {
        "get" => Some(TokenType::Get),
        "from" => Some(TokenType::From),
        "where" => Some(TokenType::Where),
        "with" => Some(TokenType::With),
        "limit" => Some(TokenType::Limit),
        "and" => Some(TokenType::And),
        "contains" => Some(TokenType::Contains),
        "equals" => Some(TokenType::Equals),
        "count" => Some(TokenType::Count),
        "min" => Some(TokenType::Min),
        "max" => Some(TokenType::Max),
        "avg" => Some(TokenType::Avg),
        "sum" => Some(TokenType::Sum),
        _ => None,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn word_len(input: &str) -> usize {
    input
        .char_indices()
        .find(|(_, c)| !is_word_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(input.len())
}

/// Match one phrase: words separated by whitespace, ending on a word boundary
fn phrase<'a>(input: &'a str, words: &[&str]) -> IResult<&'a str, &'a str> {
    let mut rest = input;
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            let (r, _) = multispace1(rest)?;
            rest = r;
        }
        let (r, _) = tag_no_case(*word)(rest)?;
        rest = r;
    }
    let (rest, _) = not(satisfy(is_word_char))(rest)?;
    Ok((rest, &input[..input.len() - rest.len()]))
}

/// Byte length and token type of the operator phrase at the start of `input`
fn match_phrase(input: &str) -> Option<(usize, TokenType)> {
    PHRASES.iter().find_map(|(words, token_type)| {
        phrase(input, words)
            .ok()
            .map(|(_, matched)| (matched.len(), *token_type))
    })
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)
}

/// Find the longest run of two or more space-separated words starting at
/// `input` that names a known field. Returns the byte length consumed and the
/// words joined by single spaces.
fn longest_field_name(input: &str, first_len: usize) -> Option<(usize, String)> {
    let mut words = vec![&input[..first_len]];
    let mut end = first_len;
    let mut best = None;

    while words.len() < MAX_FIELD_WORDS {
        let after = &input[end..];
        let gap = after
            .char_indices()
            .find(|(_, c)| *c != ' ' && *c != '\t')
            .map(|(i, _)| i)
            .unwrap_or(after.len());
        if gap == 0 {
            break;
        }

        let next = &after[gap..];
        if !next.starts_with(|c: char| c.is_ascii_alphabetic()) || match_phrase(next).is_some() {
            break;
        }

        let len = word_len(next);
        words.push(&next[..len]);
        end += gap + len;

        let candidate = words.join(" ");
        if fields::is_known_field(&candidate) {
            best = Some((end, candidate));
        }
    }

    best
}
