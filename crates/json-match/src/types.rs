//! Path expression types.
//!
//! A [`Path`] is an ordered sequence of [`Segment`]s addressing one or more
//! locations inside a JSON document. Paths have two wire forms: a string
//! expression (`"a.b[2]"`, `"items[_key==\"x\"].title"`) and a JSON array of
//! segments (`["a", "b", 2]`, with keyed segments as `{"_key": "x"}`). The
//! array form can carry attribute names the expression grammar cannot spell;
//! recursive and filter segments exist only in the expression form.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::parser::{PathParser, PathSyntaxError};

/// Reserved field carrying the stable key of an array item.
pub const KEY_FIELD: &str = "_key";

/// One step of a path expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Named attribute access: `a`, `.title`.
    Attribute(String),
    /// Positional array access: `[2]`. Negative indices count from the end
    /// of the array; `-1` addresses the last element, or the sole insertion
    /// point of an empty array when used as an insert reference.
    Index(isize),
    /// Keyed array access: `[_key=="x"]`. Matches the single item carrying
    /// the key, regardless of its position.
    Key(String),
    /// Recursive descent: `..`. Expands to the current node and every
    /// descendant, pre-order.
    Recursive,
    /// Attribute filter over array items: `[p=="Y"]`. Keeps items whose
    /// `field` equals the literal.
    Filter { field: String, literal: Value },
}

impl Segment {
    /// Returns true for segments that can match more than one location.
    pub fn is_multi(&self) -> bool {
        matches!(self, Segment::Recursive | Segment::Filter { .. })
    }
}

/// An ordered sequence of segments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Shorthand for a single-attribute path.
    pub fn attribute(name: impl Into<String>) -> Self {
        Self::new(vec![Segment::Attribute(name.into())])
    }

    /// Parse a string expression. See [`PathParser`] for the grammar.
    pub fn parse(input: &str) -> Result<Self, PathSyntaxError> {
        PathParser::parse(input)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Split into the leading segments and the final one. `None` for an
    /// empty path.
    pub fn split_last(&self) -> Option<(Path, &Segment)> {
        let (last, prefix) = self.segments.split_last()?;
        Some((Path::new(prefix.to_vec()), last))
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Self::new(segments)
    }
}

impl FromStr for Path {
    type Err = PathSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

// ── Canonical string form ─────────────────────────────────────────────────

fn write_literal(f: &mut fmt::Formatter<'_>, literal: &Value) -> fmt::Result {
    match literal {
        Value::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Attribute(name) => write!(f, "{name}"),
            Segment::Index(i) => write!(f, "[{i}]"),
            Segment::Key(key) => write!(f, "[{KEY_FIELD}==\"{key}\"]"),
            Segment::Recursive => write!(f, ".."),
            Segment::Filter { field, literal } => {
                write!(f, "[{field}==")?;
                write_literal(f, literal)?;
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut prev: Option<&Segment> = None;
        for segment in &self.segments {
            // Attributes join with '.' except at the start and right after
            // a recursive segment ("..a", not "...a").
            if let Segment::Attribute(_) = segment {
                match prev {
                    None | Some(Segment::Recursive) => {}
                    Some(_) => write!(f, ".")?,
                }
            }
            write!(f, "{segment}")?;
            prev = Some(segment);
        }
        Ok(())
    }
}

// ── Serde: string or segment-array wire form ──────────────────────────────

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct PathVisitor;

impl<'de> Visitor<'de> for PathVisitor {
    type Value = Path;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a path expression string or an array of path segments")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Path, E> {
        Path::parse(v).map_err(de::Error::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Path, A::Error> {
        let mut segments = Vec::new();
        while let Some(element) = seq.next_element::<Value>()? {
            segments.push(segment_from_value(element).map_err(de::Error::custom)?);
        }
        Ok(Path::new(segments))
    }
}

fn segment_from_value(value: Value) -> Result<Segment, String> {
    match value {
        Value::String(name) => Ok(Segment::Attribute(name)),
        Value::Number(n) => n
            .as_i64()
            .map(|i| Segment::Index(i as isize))
            .ok_or_else(|| format!("non-integer index segment: {n}")),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(key)) = map.get(KEY_FIELD) {
                    return Ok(Segment::Key(key.clone()));
                }
            }
            Err(format!(
                "object segment must be {{\"{KEY_FIELD}\": string}}, got {}",
                Value::Object(map)
            ))
        }
        other => Err(format!("unsupported path segment: {other}")),
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PathVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_round_trip() {
        for expr in [
            "a",
            "a.b",
            "a.b[2]",
            "a[-1]",
            "items[_key==\"x\"].title",
            "..[p==\"Y\"].a",
            "a..b",
            "rows[col==3]",
        ] {
            let path = Path::parse(expr).unwrap();
            assert_eq!(path.to_string(), expr);
        }
    }

    #[test]
    fn deserialize_string_form() {
        let path: Path = serde_json::from_value(json!("a.b[2]")).unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Attribute("a".into()),
                Segment::Attribute("b".into()),
                Segment::Index(2),
            ]
        );
    }

    #[test]
    fn deserialize_array_form() {
        let path: Path = serde_json::from_value(json!(["a", 2, {"_key": "x"}])).unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Attribute("a".into()),
                Segment::Index(2),
                Segment::Key("x".into()),
            ]
        );
    }

    #[test]
    fn array_form_rejects_junk() {
        assert!(serde_json::from_value::<Path>(json!([true])).is_err());
        assert!(serde_json::from_value::<Path>(json!([{"_key": 1}])).is_err());
    }
}
