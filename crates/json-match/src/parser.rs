//! Path expression parser.
//!
//! Grammar, informally:
//!
//! ```text
//! path     := segment ( '.' ident | '..' | bracket | ident-after-'..' )*
//! segment  := ident | bracket | '..'
//! bracket  := '[' ( integer | ident '==' literal ) ']'
//! literal  := string | number | 'true' | 'false' | 'null'
//! ```
//!
//! `[_key=="x"]` is recognized as a keyed segment; every other `==` bracket
//! is an attribute filter.

use serde_json::Value;
use thiserror::Error;

use crate::types::{Path, Segment, KEY_FIELD};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PathSyntaxError {
    #[error("empty path expression")]
    Empty,
    #[error("unexpected character `{found}` at offset {at}")]
    UnexpectedChar { found: char, at: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number `{token}`")]
    InvalidNumber { token: String },
    #[error("unclosed string literal starting at offset {at}")]
    UnclosedString { at: usize },
    #[error("invalid escape sequence in string literal")]
    InvalidEscape,
    #[error("unrecognized segment `{segment}`")]
    UnknownSegment { segment: String },
}

/// Recursive-descent parser over a path expression string.
pub struct PathParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> PathParser<'a> {
    pub fn parse(input: &'a str) -> Result<Path, PathSyntaxError> {
        let mut parser = Self { input, pos: 0 };
        parser.parse_path()
    }

    fn parse_path(&mut self) -> Result<Path, PathSyntaxError> {
        let mut segments: Vec<Segment> = Vec::new();

        while !self.is_at_end() {
            if self.peek_str("..") {
                self.advance_by(2);
                segments.push(Segment::Recursive);
                continue;
            }
            match self.peek() {
                Some('[') => {
                    segments.push(self.parse_bracket()?);
                }
                Some('.') => {
                    if segments.is_empty() {
                        return Err(PathSyntaxError::UnexpectedChar {
                            found: '.',
                            at: self.pos,
                        });
                    }
                    self.advance();
                    let name = self.parse_identifier()?;
                    segments.push(Segment::Attribute(name));
                }
                Some(c) => {
                    // A bare identifier is only legal at the start of the
                    // expression or directly after a recursive segment.
                    let bare_ok =
                        segments.is_empty() || matches!(segments.last(), Some(Segment::Recursive));
                    if !bare_ok {
                        return Err(PathSyntaxError::UnexpectedChar { found: c, at: self.pos });
                    }
                    let name = self.parse_identifier()?;
                    segments.push(Segment::Attribute(name));
                }
                None => break,
            }
        }

        if segments.is_empty() {
            return Err(PathSyntaxError::Empty);
        }
        Ok(Path::new(segments))
    }

    fn parse_bracket(&mut self) -> Result<Segment, PathSyntaxError> {
        let open = self.pos;
        self.expect('[')?;
        self.skip_whitespace();

        let segment = match self.peek() {
            Some('-') | Some('0'..='9') => {
                let index = self.parse_integer()?;
                Segment::Index(index)
            }
            Some(c) if c.is_alphanumeric() || c == '_' => {
                let field = self.parse_identifier()?;
                self.skip_whitespace();
                if !self.peek_str("==") {
                    return Err(self.unknown_segment_from(open));
                }
                self.advance_by(2);
                self.skip_whitespace();
                let literal = self.parse_literal()?;
                if field == KEY_FIELD {
                    match literal {
                        Value::String(key) => Segment::Key(key),
                        other => Segment::Filter { field, literal: other },
                    }
                } else {
                    Segment::Filter { field, literal }
                }
            }
            Some(c) => return Err(PathSyntaxError::UnexpectedChar { found: c, at: self.pos }),
            None => return Err(PathSyntaxError::UnexpectedEnd),
        };

        self.skip_whitespace();
        self.expect(']')?;
        Ok(segment)
    }

    fn parse_literal(&mut self) -> Result<Value, PathSyntaxError> {
        match self.peek() {
            Some('\'') | Some('"') => Ok(Value::String(self.parse_string()?)),
            Some('-') | Some('0'..='9') => self.parse_number_literal(),
            _ if self.peek_str("true") => {
                self.advance_by(4);
                Ok(Value::Bool(true))
            }
            _ if self.peek_str("false") => {
                self.advance_by(5);
                Ok(Value::Bool(false))
            }
            _ if self.peek_str("null") => {
                self.advance_by(4);
                Ok(Value::Null)
            }
            Some(c) => Err(PathSyntaxError::UnexpectedChar { found: c, at: self.pos }),
            None => Err(PathSyntaxError::UnexpectedEnd),
        }
    }

    fn parse_integer(&mut self) -> Result<isize, PathSyntaxError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.advance();
        }
        while matches!(self.peek(), Some('0'..='9')) {
            self.advance();
        }
        let token = &self.input[start..self.pos];
        token.parse::<isize>().map_err(|_| PathSyntaxError::InvalidNumber {
            token: token.to_string(),
        })
    }

    fn parse_number_literal(&mut self) -> Result<Value, PathSyntaxError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.advance();
        }
        while matches!(self.peek(), Some('0'..='9')) {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some('0'..='9')) {
                self.advance();
            }
        }
        let token = &self.input[start..self.pos];
        if is_float {
            let f: f64 = token.parse().map_err(|_| PathSyntaxError::InvalidNumber {
                token: token.to_string(),
            })?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| PathSyntaxError::InvalidNumber {
                    token: token.to_string(),
                })
        } else {
            let i: i64 = token.parse().map_err(|_| PathSyntaxError::InvalidNumber {
                token: token.to_string(),
            })?;
            Ok(Value::Number(i.into()))
        }
    }

    fn parse_identifier(&mut self) -> Result<String, PathSyntaxError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => self.advance(),
            Some(c) => return Err(PathSyntaxError::UnexpectedChar { found: c, at: self.pos }),
            None => return Err(PathSyntaxError::UnexpectedEnd),
        }
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_string(&mut self) -> Result<String, PathSyntaxError> {
        let open = self.pos;
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(PathSyntaxError::UnclosedString { at: open }),
        };
        self.advance();

        let mut result = String::new();
        loop {
            match self.peek() {
                None => return Err(PathSyntaxError::UnclosedString { at: open }),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        Some('\\') => result.push('\\'),
                        Some('\'') => result.push('\''),
                        Some('"') => result.push('"'),
                        _ => return Err(PathSyntaxError::InvalidEscape),
                    }
                    self.advance();
                }
                Some(c) => {
                    result.push(c);
                    self.advance();
                }
            }
        }
        Ok(result)
    }

    /// Build an `UnknownSegment` error covering the bracket that started at
    /// `open`, through the closing `]` if one is in sight.
    fn unknown_segment_from(&self, open: usize) -> PathSyntaxError {
        let rest = &self.input[open..];
        let end = rest.find(']').map(|i| open + i + 1).unwrap_or(self.input.len());
        PathSyntaxError::UnknownSegment {
            segment: self.input[open..end].to_string(),
        }
    }

    // ── Cursor helpers ───────────────────────────────────────────────────

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn expect(&mut self, expected: char) -> Result<(), PathSyntaxError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.advance();
                Ok(())
            }
            Some(c) => Err(PathSyntaxError::UnexpectedChar { found: c, at: self.pos }),
            None => Err(PathSyntaxError::UnexpectedEnd),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(input: &str) -> Vec<Segment> {
        PathParser::parse(input).unwrap().segments().to_vec()
    }

    #[test]
    fn attributes_and_indices() {
        assert_eq!(
            parse("a.b[2]"),
            vec![
                Segment::Attribute("a".into()),
                Segment::Attribute("b".into()),
                Segment::Index(2),
            ]
        );
        assert_eq!(parse("a[-1]"), vec![Segment::Attribute("a".into()), Segment::Index(-1)]);
    }

    #[test]
    fn keyed_segment() {
        assert_eq!(
            parse("a[_key==\"x\"]"),
            vec![Segment::Attribute("a".into()), Segment::Key("x".into())]
        );
        // Single quotes work too.
        assert_eq!(
            parse("a[_key=='x']"),
            vec![Segment::Attribute("a".into()), Segment::Key("x".into())]
        );
    }

    #[test]
    fn filter_segment_literals() {
        assert_eq!(
            parse("rows[n==3]"),
            vec![
                Segment::Attribute("rows".into()),
                Segment::Filter { field: "n".into(), literal: json!(3) },
            ]
        );
        assert_eq!(
            parse("rows[ok==true]"),
            vec![
                Segment::Attribute("rows".into()),
                Segment::Filter { field: "ok".into(), literal: json!(true) },
            ]
        );
    }

    #[test]
    fn recursive_descent() {
        assert_eq!(
            parse("..[p==\"Y\"].a"),
            vec![
                Segment::Recursive,
                Segment::Filter { field: "p".into(), literal: json!("Y") },
                Segment::Attribute("a".into()),
            ]
        );
        assert_eq!(
            parse("a..b"),
            vec![
                Segment::Attribute("a".into()),
                Segment::Recursive,
                Segment::Attribute("b".into()),
            ]
        );
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(PathParser::parse(""), Err(PathSyntaxError::Empty));
        assert!(matches!(
            PathParser::parse("a[").unwrap_err(),
            PathSyntaxError::UnexpectedEnd
        ));
        assert!(matches!(
            PathParser::parse("a[1x]").unwrap_err(),
            PathSyntaxError::UnexpectedChar { found: 'x', .. }
        ));
        assert!(matches!(
            PathParser::parse("a[b=='oops]").unwrap_err(),
            PathSyntaxError::UnclosedString { .. }
        ));
        assert!(matches!(
            PathParser::parse(".a").unwrap_err(),
            PathSyntaxError::UnexpectedChar { found: '.', at: 0 }
        ));
    }

    #[test]
    fn unknown_segment_names_the_substring() {
        let err = PathParser::parse("a[b<3]").unwrap_err();
        assert_eq!(
            err,
            PathSyntaxError::UnknownSegment { segment: "[b<3]".into() }
        );
    }
}
