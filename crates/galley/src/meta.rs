//! Reserved document fields.
//!
//! Documents carry their identity inline: `_id`, `_type`, `_rev` and
//! `_updatedAt` live beside user content at the top level of the value.

use serde_json::Value;

pub const ID_FIELD: &str = "_id";
pub const TYPE_FIELD: &str = "_type";
pub const REV_FIELD: &str = "_rev";
pub const UPDATED_AT_FIELD: &str = "_updatedAt";

/// Fields the engine manages; document-mirroring patches skip these.
pub const RESERVED_FIELDS: &[&str] = &[ID_FIELD, TYPE_FIELD, REV_FIELD, UPDATED_AT_FIELD];

pub fn document_id(doc: &Value) -> Option<&str> {
    doc.as_object()?.get(ID_FIELD)?.as_str()
}

pub fn document_type(doc: &Value) -> Option<&str> {
    doc.as_object()?.get(TYPE_FIELD)?.as_str()
}

pub fn revision(doc: &Value) -> Option<&str> {
    doc.as_object()?.get(REV_FIELD)?.as_str()
}

pub fn updated_at(doc: &Value) -> Option<&str> {
    doc.as_object()?.get(UPDATED_AT_FIELD)?.as_str()
}

pub fn set_revision(doc: &mut Value, rev: &str) {
    if let Some(object) = doc.as_object_mut() {
        object.insert(REV_FIELD.to_string(), Value::String(rev.to_string()));
    }
}

/// Return a copy of `doc` re-addressed to `id`, dropping the stale `_rev`.
pub fn with_id(doc: &Value, id: &str) -> Value {
    let mut copy = doc.clone();
    if let Some(object) = copy.as_object_mut() {
        object.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        object.remove(REV_FIELD);
    }
    copy
}
