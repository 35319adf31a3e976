//! Concrete-trace navigation helpers shared by the resolver and appliers.

use serde_json::Value;

use crate::resolve::Step;
use crate::types::KEY_FIELD;

/// Read the value a concrete trace points at, if it exists.
pub fn get_at<'a>(doc: &'a Value, trace: &[Step]) -> Option<&'a Value> {
    let mut current = doc;
    for step in trace {
        current = match step {
            Step::Field(name) => current.as_object()?.get(name)?,
            Step::At(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

/// Mutable counterpart of [`get_at`].
pub fn get_mut_at<'a>(doc: &'a mut Value, trace: &[Step]) -> Option<&'a mut Value> {
    let mut current = doc;
    for step in trace {
        current = match step {
            Step::Field(name) => current.as_object_mut()?.get_mut(name)?,
            Step::At(index) => current.as_array_mut()?.get_mut(*index)?,
        };
    }
    Some(current)
}

/// The `_key` of an array item, if it carries one.
pub fn item_key(item: &Value) -> Option<&str> {
    item.as_object()?.get(KEY_FIELD)?.as_str()
}

/// Position of the item carrying `key`, scanning the whole array. Returns
/// every matching index so callers can reject duplicates.
pub fn indices_of_key(array: &[Value], key: &str) -> Vec<usize> {
    array
        .iter()
        .enumerate()
        .filter(|(_, item)| item_key(item) == Some(key))
        .map(|(index, _)| index)
        .collect()
}

/// Loose equality for filter literals: numbers compare by value, so an
/// integer `3` in a document matches a literal `3.0` and vice versa.
pub fn literal_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Render a trace in path-expression style, for error messages.
pub fn trace_string(trace: &[Step]) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for step in trace {
        match step {
            Step::Field(name) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(name);
            }
            Step::At(index) => {
                let _ = write!(out, "[{index}]");
            }
        }
    }
    if out.is_empty() {
        out.push_str("<root>");
    }
    out
}
