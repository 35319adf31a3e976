//! Patch operation types and errors.

use serde_json::Value;
use thiserror::Error;

use galley_json_match::{Path, PathSyntaxError, ResolveError};

/// Where inserted items land relative to the resolved reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
}

impl InsertPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertPosition::Before => "before",
            InsertPosition::After => "after",
        }
    }
}

/// One declarative edit operation targeting a path within a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Unconditionally write `value` at every target.
    Replace { path: Path, value: Value },
    /// Same effect as `Replace`; kept as a distinct wire type.
    Set { path: Path, value: Value },
    /// Write `value` only where the target slot is absent or null.
    SetIfMissing { path: Path, value: Value },
    /// Remove the targeted attribute or array items. Absent targets are a
    /// no-op.
    Unset { path: Path },
    /// Add `amount` to the numeric value at every target.
    Inc { path: Path, amount: f64 },
    /// Subtract `amount` from the numeric value at every target.
    Dec { path: Path, amount: f64 },
    /// Splice `items` into the array addressed by `reference`'s prefix,
    /// before or after the position its final segment resolves to.
    Insert {
        position: InsertPosition,
        reference: Path,
        items: Vec<Value>,
    },
    /// Apply a context-based text diff (diff-match-patch transport format)
    /// to the string at every target.
    DiffTextPatch { path: Path, patch: String },
}

impl Patch {
    /// Wire name of the operation.
    pub fn op_name(&self) -> &'static str {
        match self {
            Patch::Replace { .. } => "replace",
            Patch::Set { .. } => "set",
            Patch::SetIfMissing { .. } => "setIfMissing",
            Patch::Unset { .. } => "unset",
            Patch::Inc { .. } => "inc",
            Patch::Dec { .. } => "dec",
            Patch::Insert { .. } => "insert",
            Patch::DiffTextPatch { .. } => "diffTextPatch",
        }
    }

    /// The path the operation targets (the reference path, for inserts).
    pub fn path(&self) -> &Path {
        match self {
            Patch::Replace { path, .. }
            | Patch::Set { path, .. }
            | Patch::SetIfMissing { path, .. }
            | Patch::Unset { path }
            | Patch::Inc { path, .. }
            | Patch::Dec { path, .. }
            | Patch::DiffTextPatch { path, .. } => path,
            Patch::Insert { reference, .. } => reference,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatchError {
    #[error("invalid path expression: {0}")]
    PathSyntax(#[from] PathSyntaxError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("type mismatch at `{path}`: {op} expects {expected}, found {found}")]
    TypeMismatch {
        path: String,
        op: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("stale text patch at `{path}`: {detail}")]
    PatchConflict { path: String, detail: String },
    #[error("insert reference `{reference}` does not resolve to an array")]
    InvalidInsert { reference: String },
    #[error("malformed patch: {0}")]
    Malformed(String),
}

/// Wire-level name of a JSON value's type, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
