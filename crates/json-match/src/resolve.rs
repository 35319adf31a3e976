//! Path resolution: from a parsed [`Path`] and a document value to the set
//! of concrete targets the path addresses.
//!
//! Resolution consumes one segment at a time, accumulating branches (one per
//! matched location). The final segment is special: it produces *slots*
//! rather than existing nodes, so a trailing attribute segment yields a
//! target even when the field is currently absent; that is what lets `set`
//! create new fields. Every target is collected before any mutation begins;
//! appliers must not interleave resolution with writes (array splices would
//! shift the indices of later targets).

use serde_json::Value;
use thiserror::Error;

use crate::types::{Path, Segment};
use crate::util::{get_at, indices_of_key, literal_eq, trace_string};

/// One concrete navigation step from the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Field(String),
    At(usize),
}

/// A concrete route from the document root to a node.
pub type Trace = Vec<Step>;

/// A resolved location an operation can be applied to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A named slot in the object at `parent`. The field may not exist yet.
    Attribute { parent: Trace, name: String },
    /// One or more positions in the array at `parent`, ascending. Keyed and
    /// filter segments can alias several indices at once.
    Index { parent: Trace, indices: Vec<usize> },
}

impl Target {
    pub fn parent(&self) -> &Trace {
        match self {
            Target::Attribute { parent, .. } => parent,
            Target::Index { parent, .. } => parent,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("duplicate _key \"{key}\" in array at `{path}`")]
    DuplicateKey { key: String, path: String },
}

/// Resolve `path` against `doc`, producing the target set. An empty result
/// is not an error; callers decide whether zero targets is a no-op.
pub fn resolve(doc: &Value, path: &Path) -> Result<Vec<Target>, ResolveError> {
    let Some((prefix, last)) = path.split_last() else {
        return Ok(Vec::new());
    };

    let mut targets = Vec::new();
    for trace in descend(doc, prefix.segments())? {
        let Some(value) = get_at(doc, &trace) else { continue };
        match last {
            Segment::Attribute(name) => {
                if value.is_object() {
                    targets.push(Target::Attribute { parent: trace, name: name.clone() });
                }
            }
            Segment::Index(i) => {
                if let Some(array) = value.as_array() {
                    if let Some(index) = normalize_index(*i, array.len()) {
                        targets.push(Target::Index { parent: trace, indices: vec![index] });
                    }
                }
            }
            Segment::Key(key) => {
                if let Some(array) = value.as_array() {
                    if let Some(index) = unique_key_index(array, key, &trace)? {
                        targets.push(Target::Index { parent: trace, indices: vec![index] });
                    }
                }
            }
            Segment::Filter { field, literal } => {
                if let Some(array) = value.as_array() {
                    let indices = filter_indices(array, field, literal);
                    if !indices.is_empty() {
                        targets.push(Target::Index { parent: trace, indices });
                    }
                }
            }
            // A path ending in `..` addresses no concrete slot.
            Segment::Recursive => {}
        }
    }
    Ok(targets)
}

/// Resolve `path` to the traces of *existing* nodes matching every segment.
/// Unlike [`resolve`], the final segment descends rather than producing a
/// slot; absent fields match nothing.
pub fn locate(doc: &Value, path: &Path) -> Result<Vec<Trace>, ResolveError> {
    descend(doc, path.segments())
}

// ── Internals ─────────────────────────────────────────────────────────────

fn descend(doc: &Value, segments: &[Segment]) -> Result<Vec<Trace>, ResolveError> {
    let mut branches: Vec<Trace> = vec![Vec::new()];
    for segment in segments {
        let mut next = Vec::new();
        for trace in branches {
            let Some(value) = get_at(doc, &trace) else { continue };
            match segment {
                Segment::Attribute(name) => {
                    if let Some(object) = value.as_object() {
                        if object.contains_key(name) {
                            next.push(extended(&trace, Step::Field(name.clone())));
                        }
                    }
                }
                Segment::Index(i) => {
                    if let Some(array) = value.as_array() {
                        if let Some(index) = normalize_index(*i, array.len()) {
                            next.push(extended(&trace, Step::At(index)));
                        }
                    }
                }
                Segment::Key(key) => {
                    if let Some(array) = value.as_array() {
                        if let Some(index) = unique_key_index(array, key, &trace)? {
                            next.push(extended(&trace, Step::At(index)));
                        }
                    }
                }
                Segment::Filter { field, literal } => {
                    if let Some(array) = value.as_array() {
                        for index in filter_indices(array, field, literal) {
                            next.push(extended(&trace, Step::At(index)));
                        }
                    }
                }
                Segment::Recursive => {
                    push_descendants(doc, trace, &mut next);
                }
            }
        }
        branches = next;
    }
    Ok(branches)
}

/// Pre-order expansion: the node itself, then every descendant.
fn push_descendants(doc: &Value, trace: Trace, out: &mut Vec<Trace>) {
    let value = get_at(doc, &trace);
    out.push(trace.clone());
    match value {
        Some(Value::Object(map)) => {
            for key in map.keys() {
                push_descendants(doc, extended(&trace, Step::Field(key.clone())), out);
            }
        }
        Some(Value::Array(array)) => {
            for index in 0..array.len() {
                push_descendants(doc, extended(&trace, Step::At(index)), out);
            }
        }
        _ => {}
    }
}

fn extended(trace: &Trace, step: Step) -> Trace {
    let mut next = trace.clone();
    next.push(step);
    next
}

/// Map a possibly-negative index onto the array. Out-of-bounds resolves to
/// nothing.
fn normalize_index(index: isize, len: usize) -> Option<usize> {
    let normalized = if index < 0 { len as isize + index } else { index };
    if normalized >= 0 && (normalized as usize) < len {
        Some(normalized as usize)
    } else {
        None
    }
}

fn unique_key_index(
    array: &[Value],
    key: &str,
    trace: &Trace,
) -> Result<Option<usize>, ResolveError> {
    let matches = indices_of_key(array, key);
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches[0])),
        _ => Err(ResolveError::DuplicateKey {
            key: key.to_string(),
            path: trace_string(trace),
        }),
    }
}

fn filter_indices(array: &[Value], field: &str, literal: &Value) -> Vec<usize> {
    array
        .iter()
        .enumerate()
        .filter(|(_, item)| {
            item.as_object()
                .and_then(|object| object.get(field))
                .is_some_and(|value| literal_eq(value, literal))
        })
        .map(|(index, _)| index)
        .collect()
}
