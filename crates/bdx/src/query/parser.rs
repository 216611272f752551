// Copyright 2025 BDX Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The query language parser.
//!
//! Grammar (terminals quoted):
//!
//! ```text
//! query    ::= or_expr
//! or_expr  ::= and_expr ( "OR" or_expr )?
//! and_expr ::= expr ( ("AND" | <juxtaposition>) and_expr )?
//! expr     ::= ("NOT" | "!") expr
//!            | "*:*"
//!            | "(" query ")"
//!            | IDENT ":" value
//!            | value
//! value    ::= (TERM | STRING) "*"?
//! ```
//!
//! Juxtaposition is AND. `AND`, `OR`, `NOT` are case-sensitive keywords.
//! Wildcards are prefix-only. Numeric fields take `N`, `A..B`, `A..` or
//! `..B` values in decimal or `0x` hex.

use std::error::Error;
use std::fmt::{self, Display};

use super::ast::Query;
use crate::schema::{self, FieldKind};

/// A query syntax error, with the byte position it occurred at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub msg: String,
    pub pos: usize,
}

impl ParseError {
    fn new(msg: impl Into<String>, pos: usize) -> Self {
        ParseError { msg: msg.into(), pos }
    }

    /// Render the offending query with a caret under the failing position.
    pub fn render_caret(&self, query: &str) -> String {
        format!("{}\n  {}\n  {}^", self.msg, query, " ".repeat(self.pos.min(query.len())))
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.msg, self.pos)
    }
}

impl Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Eof,
    LParen,
    RParen,
    And,
    Or,
    Not,
    MatchAll,
    Wildcard,
    Term(String),
    Str(String),
    Field(String),
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Eof => "end of query".to_string(),
            Tok::LParen => "\"(\"".to_string(),
            Tok::RParen => "\")\"".to_string(),
            Tok::And => "AND".to_string(),
            Tok::Or => "OR".to_string(),
            Tok::Not => "NOT".to_string(),
            Tok::MatchAll => "\"*:*\"".to_string(),
            Tok::Wildcard => "\"*\"".to_string(),
            Tok::Term(v) => format!("term \"{}\"", v),
            Tok::Str(v) => format!("string \"{}\"", v),
            Tok::Field(v) => format!("field \"{}:\"", v),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
    end: usize,
}

fn is_term_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '*' | '"')
}

fn keyword(rest: &str) -> Option<(Tok, usize)> {
    for (word, tok) in [("AND", Tok::And), ("OR", Tok::Or), ("NOT", Tok::Not)] {
        if let Some(after) = rest.strip_prefix(word) {
            let boundary = after
                .chars()
                .next()
                .map(|c| !c.is_alphanumeric() && c != '_')
                .unwrap_or(true);
            if boundary {
                return Some((tok, word.len()));
            }
        }
    }
    None
}

fn lex(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let bytes = src.as_bytes();
    while pos < src.len() {
        let rest = &src[pos..];
        let c = rest.chars().next().unwrap();
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }
        let start = pos;
        let tok = match c {
            '(' => {
                pos += 1;
                Tok::LParen
            }
            ')' => {
                pos += 1;
                Tok::RParen
            }
            '!' => {
                pos += 1;
                Tok::Not
            }
            '"' => {
                match rest[1..].find('"') {
                    Some(idx) => {
                        let value = rest[1..1 + idx].to_string();
                        pos += idx + 2;
                        Tok::Str(value)
                    }
                    None => return Err(ParseError::new("unterminated string", start)),
                }
            }
            '*' => {
                if rest.starts_with("*:*") {
                    pos += 3;
                    Tok::MatchAll
                } else {
                    pos += 1;
                    Tok::Wildcard
                }
            }
            _ => {
                if let Some((tok, len)) = keyword(rest) {
                    pos += len;
                    tok
                } else {
                    // a field name is an identifier directly followed by ':'
                    let ident_len = rest
                        .find(|c: char| !c.is_ascii_alphabetic() && c != '_')
                        .unwrap_or(rest.len());
                    if ident_len > 0 && bytes.get(pos + ident_len) == Some(&b':') {
                        let name = rest[..ident_len].to_string();
                        pos += ident_len + 1;
                        Tok::Field(name)
                    } else {
                        let term_len = rest
                            .find(|c: char| !is_term_char(c))
                            .unwrap_or(rest.len());
                        let value = rest[..term_len].to_string();
                        pos += term_len;
                        Tok::Term(value)
                    }
                }
            }
        };
        tokens.push(Token { tok, start, end: pos });
    }
    tokens.push(Token { tok: Tok::Eof, start: src.len(), end: src.len() });
    Ok(tokens)
}

/// Recursive-descent parser for the query language.
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    auto_wildcard: bool,
}

impl QueryParser {
    pub fn new() -> Self {
        QueryParser { auto_wildcard: false }
    }

    /// Treat every bare name term as a prefix wildcard, the behavior the
    /// CLI exposes.
    pub fn auto_wildcard(mut self, yes: bool) -> Self {
        self.auto_wildcard = yes;
        self
    }

    pub fn parse(&self, input: &str) -> Result<Query, ParseError> {
        if input.trim().is_empty() {
            return Ok(Query::Nothing);
        }
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens,
            idx: 0,
            auto_wildcard: self.auto_wildcard,
        };
        let parsed = parser.parse_or()?;
        let cur = parser.cur().clone();
        if cur.tok != Tok::Eof {
            return Err(ParseError::new(
                format!("expected end of query, got {}", cur.tok.describe()),
                cur.start,
            ));
        }
        parsed.ok_or_else(|| ParseError::new("expected a query expression", 0))
    }
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    auto_wildcard: bool,
}

impl Parser {
    fn cur(&self) -> &Token {
        &self.tokens[self.idx]
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.idx].clone();
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Option<Query>, ParseError> {
        let Some(lhs) = self.parse_and()? else {
            return Ok(None);
        };
        if self.cur().tok == Tok::Or {
            let op = self.bump();
            let rhs = self.parse_or()?.ok_or_else(|| {
                ParseError::new("expected an operand after OR", op.end)
            })?;
            return Ok(Some(Query::Or(Box::new(lhs), Box::new(rhs))));
        }
        Ok(Some(lhs))
    }

    fn parse_and(&mut self) -> Result<Option<Query>, ParseError> {
        let Some(lhs) = self.parse_expr()? else {
            return Ok(None);
        };
        if self.cur().tok == Tok::And {
            let op = self.bump();
            let rhs = self.parse_and()?.ok_or_else(|| {
                ParseError::new("expected an operand after AND", op.end)
            })?;
            return Ok(Some(Query::And(Box::new(lhs), Box::new(rhs))));
        }
        // juxtaposition is AND
        if let Some(rhs) = self.parse_and()? {
            return Ok(Some(Query::And(Box::new(lhs), Box::new(rhs))));
        }
        Ok(Some(lhs))
    }

    fn parse_expr(&mut self) -> Result<Option<Query>, ParseError> {
        match self.cur().tok.clone() {
            Tok::MatchAll => {
                self.bump();
                Ok(Some(Query::MatchAll))
            }
            Tok::Not => {
                let op = self.bump();
                let inner = self.parse_expr()?.ok_or_else(|| {
                    ParseError::new("expected an expression after NOT", op.end)
                })?;
                Ok(Some(Query::Not(Box::new(inner))))
            }
            Tok::LParen => {
                let open = self.bump();
                let inner = self.parse_or()?;
                let cur = self.cur().clone();
                if cur.tok != Tok::RParen {
                    return Err(ParseError::new(
                        format!("expected closing \")\" (opened at position {})", open.start),
                        cur.start,
                    ));
                }
                self.bump();
                inner
                    .map(Some)
                    .ok_or_else(|| ParseError::new("expected a query expression", open.end))
            }
            Tok::Term(value) => {
                self.bump();
                let wildcard = self.consume_wildcard()?;
                Ok(Some(Query::Name {
                    value,
                    wildcard: wildcard || self.auto_wildcard,
                }))
            }
            Tok::Str(value) => {
                self.bump();
                let wildcard = self.consume_wildcard()?;
                Ok(Some(Query::Name { value, wildcard }))
            }
            Tok::Field(name) => {
                let token = self.bump();
                self.parse_field(&name, token.start).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn parse_field(&mut self, name: &str, field_pos: usize) -> Result<Query, ParseError> {
        let Some(field) = schema::field(name) else {
            return Err(ParseError::new(
                format!(
                    "unknown field \"{}\", must be one of [{}]",
                    name,
                    schema::field_names().join(", ")
                ),
                field_pos,
            ));
        };

        if let FieldKind::Numeric(_) = field.kind {
            let cur = self.cur().clone();
            let Tok::Term(value) = cur.tok else {
                return Err(ParseError::new(
                    format!("missing numeric value for field \"{}\"", name),
                    cur.start,
                ));
            };
            self.bump();
            if self.cur().tok == Tok::Wildcard {
                return Err(ParseError::new(
                    format!("wildcards are not supported on numeric field \"{}\"", name),
                    self.cur().start,
                ));
            }
            let (lo, hi) = parse_range(&value, cur.start)?;
            return Ok(Query::Range { field: field.name, lo, hi });
        }

        let cur = self.cur().clone();
        match cur.tok {
            // `field:*` matches every record with any value for the field
            Tok::Wildcard => {
                self.bump();
                Ok(Query::Field {
                    field: field.name,
                    value: String::new(),
                    wildcard: true,
                })
            }
            Tok::Term(value) | Tok::Str(value) => {
                self.bump();
                let wildcard = self.consume_wildcard()?;
                Ok(Query::Field { field: field.name, value, wildcard })
            }
            _ => Err(ParseError::new(
                format!("missing value for field \"{}\"", name),
                cur.start,
            )),
        }
    }

    fn consume_wildcard(&mut self) -> Result<bool, ParseError> {
        if self.cur().tok != Tok::Wildcard {
            return Ok(false);
        }
        let star = self.bump();
        let next = self.cur();
        if matches!(next.tok, Tok::Term(_) | Tok::Str(_)) && next.start == star.end {
            return Err(ParseError::new("wildcards are prefix-only", star.start));
        }
        Ok(true)
    }
}

fn parse_number(s: &str, pos: usize) -> Result<u64, ParseError> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse::<u64>()
    };
    parsed.map_err(|_| ParseError::new(format!("invalid numeric value \"{}\"", s), pos))
}

fn parse_range(value: &str, pos: usize) -> Result<(Option<u64>, Option<u64>), ParseError> {
    if let Some(idx) = value.find("..") {
        let (lo_str, hi_str) = (&value[..idx], &value[idx + 2..]);
        if lo_str.is_empty() && hi_str.is_empty() {
            return Err(ParseError::new("range needs at least one bound", pos));
        }
        let lo = if lo_str.is_empty() { None } else { Some(parse_number(lo_str, pos)?) };
        let hi = if hi_str.is_empty() {
            None
        } else {
            Some(parse_number(hi_str, pos + idx + 2)?)
        };
        Ok((lo, hi))
    } else {
        let n = parse_number(value, pos)?;
        Ok((Some(n), Some(n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Query {
        QueryParser::new().parse(input).unwrap()
    }

    fn parse_err(input: &str) -> ParseError {
        QueryParser::new().parse(input).unwrap_err()
    }

    #[test]
    fn empty_query() {
        assert_eq!(parse(""), Query::Nothing);
        assert_eq!(parse("   \n  "), Query::Nothing);
    }

    #[test]
    fn match_all() {
        assert_eq!(parse(" *:* "), Query::MatchAll);
    }

    #[test]
    fn single_term() {
        assert_eq!(parse("foo").to_string(), "N(foo)");
        assert_eq!(parse("  foo  ").to_string(), "N(foo)");
    }

    #[test]
    fn juxtaposition_is_and() {
        assert_eq!(parse("foo bar").to_string(), "(AND N(foo) N(bar))");
        assert_eq!(parse("foo AND bar"), parse("foo bar"));
        assert_eq!(
            parse("foo bar baz").to_string(),
            "(AND N(foo) (AND N(bar) N(baz)))"
        );
    }

    #[test]
    fn or_and_precedence() {
        assert_eq!(
            parse("a b OR c").to_string(),
            "(OR (AND N(a) N(b)) N(c))"
        );
        assert_eq!(
            parse("(a OR b) c").to_string(),
            "(AND (OR N(a) N(b)) N(c))"
        );
    }

    #[test]
    fn not_and_bang() {
        assert_eq!(parse("NOT foo").to_string(), "(NOT N(foo))");
        assert_eq!(parse("!foo"), parse("NOT foo"));
        assert_eq!(
            parse("NOT foo bar").to_string(),
            "(AND (NOT N(foo)) N(bar))"
        );
        parse_err("NOT");
        parse_err("!NOT");
    }

    #[test]
    fn keywords_are_case_sensitive() {
        // lowercase "and" is an ordinary term
        assert_eq!(parse("and").to_string(), "N(and)");
        assert_eq!(parse("a and b").to_string(), "(AND N(a) (AND N(and) N(b)))");
    }

    #[test]
    fn quoted_strings() {
        assert_eq!(parse("\"foo bar\"").to_string(), "N(foo bar)");
        assert_eq!(
            parse("fullname:\"operator ()\"").to_string(),
            "F(fullname:operator ())"
        );
        let err = parse_err("\"unterminated");
        assert_eq!(err.pos, 0);
    }

    #[test]
    fn field_queries() {
        assert_eq!(parse("section:.text").to_string(), "F(section:.text)");
        assert_eq!(parse("fullname:bar").to_string(), "F(fullname:bar)");
        assert_eq!(
            parse("relocations:\"\"").to_string(),
            "F(relocations:)"
        );
        assert_eq!(parse("path:*").to_string(), "F(path:*)");
    }

    #[test]
    fn unknown_field_is_pointed_error() {
        let err = parse_err("nosuch:foo");
        assert!(err.msg.contains("unknown field \"nosuch\""));
        assert!(err.msg.contains("fullname"));
        assert_eq!(err.pos, 0);
    }

    #[test]
    fn missing_field_value() {
        let err = parse_err("section:");
        assert!(err.msg.contains("missing value"));
        parse_err("size:");
    }

    #[test]
    fn wildcards_prefix_only() {
        assert_eq!(parse("foo*").to_string(), "N(foo*)");
        assert_eq!(parse("name:foo*").to_string(), "F(name:foo*)");
        let err = parse_err("foo*bar");
        assert!(err.msg.contains("prefix-only"));
        // leading wildcard fails too
        parse_err("*foo");
    }

    #[test]
    fn numeric_ranges() {
        assert_eq!(parse("size:100..200").to_string(), "R(size:100..200)");
        assert_eq!(parse("size:100..").to_string(), "R(size:100..)");
        assert_eq!(parse("size:..200").to_string(), "R(size:..200)");
        assert_eq!(parse("size:42").to_string(), "R(size:42..42)");
        assert_eq!(parse("address:0x1000..0x2000").to_string(), "R(address:4096..8192)");
        parse_err("size:..");
        parse_err("size:abc");
        parse_err("size:10..x");
        parse_err("size:10*");
    }

    #[test]
    fn auto_wildcard_applies_to_bare_terms_only() {
        let parser = QueryParser::new().auto_wildcard(true);
        assert_eq!(parser.parse("foo").unwrap().to_string(), "N(foo*)");
        // quoted and field values stay exact
        assert_eq!(parser.parse("\"foo\"").unwrap().to_string(), "N(foo)");
        assert_eq!(
            parser.parse("section:.text").unwrap().to_string(),
            "F(section:.text)"
        );
    }

    #[test]
    fn unclosed_paren() {
        let err = parse_err("(a OR b");
        assert!(err.msg.contains("closing"));
        assert_eq!(err.pos, 7);
    }

    #[test]
    fn caret_rendering() {
        let err = parse_err("name foo:bar");
        let rendered = err.render_caret("name foo:bar");
        assert!(rendered.contains('^'));
        assert!(rendered.contains("name foo:bar"));
    }
}
