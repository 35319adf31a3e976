//! Patch application.
//!
//! Each operation resolves its path to a target set first, then applies the
//! effect to every target; targets are fully collected before the first
//! write so array splices cannot shift later targets of the same patch.
//! `apply_patches` is all-or-nothing: it works on a clone and the caller's
//! value is untouched unless every patch in the list succeeds.

use serde_json::Value;

use galley_json_match::util::{get_at, get_mut_at, indices_of_key, literal_eq, trace_string};
use galley_json_match::{locate, resolve, Path, ResolveError, Segment, Step, Target, Trace};

use super::text_patch::{self, TextPatchError};
use super::types::{type_name, InsertPosition, Patch, PatchError};
use crate::util::ensure_array_keys;

/// Apply an ordered patch list belonging to one mutation. Returns the new
/// document value, or the first hard error with no partial state observable.
pub fn apply_patches(doc: &Value, patches: &[Patch]) -> Result<Value, PatchError> {
    let mut working = doc.clone();
    for patch in patches {
        apply_patch(&mut working, patch)?;
    }
    Ok(working)
}

/// Apply a single patch in place. On error the document may be left
/// partially modified; use [`apply_patches`] for the all-or-nothing
/// guarantee.
pub fn apply_patch(doc: &mut Value, patch: &Patch) -> Result<(), PatchError> {
    match patch {
        Patch::Replace { path, value } | Patch::Set { path, value } => {
            apply_set(doc, path, value)?
        }
        Patch::SetIfMissing { path, value } => apply_set_if_missing(doc, path, value)?,
        Patch::Unset { path } => apply_unset(doc, path)?,
        Patch::Inc { path, amount } => apply_inc(doc, path, *amount, "inc")?,
        Patch::Dec { path, amount } => apply_inc(doc, path, -*amount, "dec")?,
        Patch::Insert { position, reference, items } => {
            apply_insert(doc, *position, reference, items)?
        }
        Patch::DiffTextPatch { path, patch } => apply_diff_text(doc, path, patch)?,
    }
    ensure_array_keys(doc);
    Ok(())
}

// ── Per-operation appliers ────────────────────────────────────────────────

fn apply_set(doc: &mut Value, path: &Path, value: &Value) -> Result<(), PatchError> {
    for target in resolve(doc, path)? {
        write_slot(doc, &target, value);
    }
    Ok(())
}

fn apply_set_if_missing(doc: &mut Value, path: &Path, value: &Value) -> Result<(), PatchError> {
    for target in resolve(doc, path)? {
        match &target {
            Target::Attribute { parent, name } => {
                if let Some(Value::Object(map)) = get_mut_at(doc, parent) {
                    let missing = matches!(map.get(name), None | Some(Value::Null));
                    if missing {
                        map.insert(name.clone(), value.clone());
                    }
                }
            }
            Target::Index { parent, indices } => {
                if let Some(Value::Array(array)) = get_mut_at(doc, parent) {
                    for &index in indices {
                        if let Some(slot) = array.get_mut(index) {
                            if slot.is_null() {
                                *slot = value.clone();
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply_unset(doc: &mut Value, path: &Path) -> Result<(), PatchError> {
    // Remove back-to-front so earlier removals cannot shift the indices of
    // targets still waiting their turn.
    let targets = resolve(doc, path)?;
    for target in targets.iter().rev() {
        match target {
            Target::Attribute { parent, name } => {
                if let Some(Value::Object(map)) = get_mut_at(doc, parent) {
                    map.remove(name);
                }
            }
            Target::Index { parent, indices } => {
                if let Some(Value::Array(array)) = get_mut_at(doc, parent) {
                    let mut ordered = indices.clone();
                    ordered.sort_unstable_by(|a, b| b.cmp(a));
                    for index in ordered {
                        if index < array.len() {
                            array.remove(index);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply_inc(doc: &mut Value, path: &Path, amount: f64, op: &'static str) -> Result<(), PatchError> {
    for target in resolve(doc, path)? {
        match &target {
            Target::Attribute { parent, name } => {
                let Some(Value::Object(map)) = get_mut_at(doc, parent) else { continue };
                let current = map.get(name);
                let next = bump(current, amount).ok_or_else(|| type_mismatch(&target, op, "number", current))?;
                map.insert(name.clone(), next);
            }
            Target::Index { parent, indices } => {
                let Some(Value::Array(array)) = get_mut_at(doc, parent) else { continue };
                for &index in indices {
                    let current = array.get(index);
                    let next = bump(current, amount)
                        .ok_or_else(|| type_mismatch(&target, op, "number", current))?;
                    array[index] = next;
                }
            }
        }
    }
    Ok(())
}

fn apply_insert(
    doc: &mut Value,
    position: InsertPosition,
    reference: &Path,
    items: &[Value],
) -> Result<(), PatchError> {
    let Some((prefix, last)) = reference.split_last() else {
        return Err(PatchError::InvalidInsert { reference: reference.to_string() });
    };

    // An attribute-final reference names the array itself: items go at the
    // end, whatever the position ("absent reference means end-of-array").
    let (parent_traces, reference_segment) = match last {
        Segment::Attribute(_) => (locate(doc, reference)?, None),
        Segment::Recursive => {
            return Err(PatchError::Malformed(
                "insert reference must end in an array position".to_string(),
            ))
        }
        other => (locate(doc, &prefix)?, Some(other)),
    };

    let mut arrays_found = false;
    let mut splices: Vec<(Trace, usize)> = Vec::new();
    for trace in parent_traces {
        let Some(Value::Array(array)) = get_at(doc, &trace) else { continue };
        arrays_found = true;
        let at = match reference_segment {
            None => Some(array.len()),
            Some(segment) => splice_index(array, segment, position)?,
        };
        if let Some(at) = at {
            splices.push((trace, at));
        }
    }
    if !arrays_found {
        return Err(PatchError::InvalidInsert { reference: reference.to_string() });
    }

    for (trace, at) in splices {
        if let Some(Value::Array(array)) = get_mut_at(doc, &trace) {
            array.splice(at..at, items.iter().cloned());
        }
    }
    Ok(())
}

/// Resolve the final reference segment of an insert against one array.
/// `None` means this array has no matching position (a no-op for it).
fn splice_index(
    array: &[Value],
    segment: &Segment,
    position: InsertPosition,
) -> Result<Option<usize>, PatchError> {
    let len = array.len() as isize;
    match segment {
        Segment::Index(i) => {
            let normalized = if *i < 0 { len + i } else { *i };
            let at = match position {
                InsertPosition::Before => normalized.clamp(0, len),
                InsertPosition::After => (normalized + 1).clamp(0, len),
            };
            Ok(Some(at as usize))
        }
        Segment::Key(key) => {
            let matches = indices_of_key(array, key);
            match matches.len() {
                0 => Ok(None),
                1 => Ok(Some(offset_for(matches[0], position))),
                _ => Err(ResolveError::DuplicateKey {
                    key: key.clone(),
                    path: "<insert reference>".to_string(),
                }
                .into()),
            }
        }
        Segment::Filter { field, literal } => {
            let matched: Vec<usize> = array
                .iter()
                .enumerate()
                .filter(|(_, item)| {
                    item.as_object()
                        .and_then(|object| object.get(field))
                        .is_some_and(|value| literal_eq(value, literal))
                })
                .map(|(index, _)| index)
                .collect();
            match (matched.first(), matched.last()) {
                (Some(&first), Some(&last)) => Ok(Some(match position {
                    InsertPosition::Before => first,
                    InsertPosition::After => last + 1,
                })),
                _ => Ok(None),
            }
        }
        Segment::Attribute(_) | Segment::Recursive => Err(PatchError::Malformed(
            "insert reference must end in an array position".to_string(),
        )),
    }
}

fn offset_for(index: usize, position: InsertPosition) -> usize {
    match position {
        InsertPosition::Before => index,
        InsertPosition::After => index + 1,
    }
}

fn apply_diff_text(doc: &mut Value, path: &Path, patch: &str) -> Result<(), PatchError> {
    let targets = resolve(doc, path)?;
    // Compute every replacement before writing any of them back, so a
    // conflict in a later target leaves nothing half-applied within this
    // patch either.
    let mut replacements: Vec<(Target, Value)> = Vec::new();
    for target in targets {
        let current = slot_value(doc, &target);
        let text = match current {
            None => continue,
            Some(Value::String(text)) => text.clone(),
            Some(other) => {
                let found = type_name(other);
                return Err(type_mismatch_found(&target, "diffTextPatch", "string", found));
            }
        };
        let patched = text_patch::apply(patch, &text).map_err(|err| match err {
            TextPatchError::Conflict => PatchError::PatchConflict {
                path: target_string(&target),
                detail: "diff context does not match the current text".to_string(),
            },
            TextPatchError::Syntax(detail) => PatchError::Malformed(detail),
        })?;
        replacements.push((target, Value::String(patched)));
    }
    for (target, value) in replacements {
        write_slot(doc, &target, &value);
    }
    Ok(())
}

// ── Slot helpers ──────────────────────────────────────────────────────────

fn write_slot(doc: &mut Value, target: &Target, value: &Value) {
    match target {
        Target::Attribute { parent, name } => {
            if let Some(Value::Object(map)) = get_mut_at(doc, parent) {
                map.insert(name.clone(), value.clone());
            }
        }
        Target::Index { parent, indices } => {
            if let Some(Value::Array(array)) = get_mut_at(doc, parent) {
                for &index in indices {
                    if let Some(slot) = array.get_mut(index) {
                        *slot = value.clone();
                    }
                }
            }
        }
    }
}

/// Read the single value a target points at. Multi-index targets read their
/// first index (callers that need per-index behavior iterate themselves).
fn slot_value<'a>(doc: &'a Value, target: &Target) -> Option<&'a Value> {
    match target {
        Target::Attribute { parent, name } => get_at(doc, parent)?.as_object()?.get(name),
        Target::Index { parent, indices } => {
            get_at(doc, parent)?.as_array()?.get(*indices.first()?)
        }
    }
}

fn bump(current: Option<&Value>, amount: f64) -> Option<Value> {
    let value = current?;
    let number = value.as_f64()?;
    if amount.fract() == 0.0 {
        if let Some(i) = value.as_i64() {
            if let Some(sum) = i.checked_add(amount as i64) {
                return Some(Value::from(sum));
            }
        }
    }
    serde_json::Number::from_f64(number + amount).map(Value::Number)
}

fn target_string(target: &Target) -> String {
    match target {
        Target::Attribute { parent, name } => {
            let mut trace = parent.clone();
            trace.push(Step::Field(name.clone()));
            trace_string(&trace)
        }
        Target::Index { parent, indices } => {
            let rendered: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
            format!("{}[{}]", trace_string(parent), rendered.join(","))
        }
    }
}

fn type_mismatch(
    target: &Target,
    op: &'static str,
    expected: &'static str,
    found: Option<&Value>,
) -> PatchError {
    type_mismatch_found(target, op, expected, found.map_or("missing", type_name))
}

fn type_mismatch_found(
    target: &Target,
    op: &'static str,
    expected: &'static str,
    found: &'static str,
) -> PatchError {
    PatchError::TypeMismatch { path: target_string(target), op, expected, found }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(expr: &str) -> Path {
        Path::parse(expr).unwrap()
    }

    fn set(expr: &str, value: Value) -> Patch {
        Patch::Set { path: path(expr), value }
    }

    #[test]
    fn set_creates_and_overwrites() {
        let doc = json!({"name": {"first": "initial", "last": "initial"}});
        let out = apply_patches(&doc, &[set("name.first", json!("changed"))]).unwrap();
        assert_eq!(out, json!({"name": {"first": "changed", "last": "initial"}}));

        let out = apply_patches(&doc, &[set("name.middle", json!("new"))]).unwrap();
        assert_eq!(out["name"]["middle"], json!("new"));
    }

    #[test]
    fn set_with_zero_targets_is_a_noop() {
        let doc = json!({"a": 1});
        let out = apply_patches(&doc, &[set("missing.deep.path", json!(1))]).unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn set_if_missing_respects_falsy_values() {
        let doc = json!({"kept": false, "zero": 0, "empty": "", "gone": null});
        let patches = [
            Patch::SetIfMissing { path: path("kept"), value: json!("x") },
            Patch::SetIfMissing { path: path("zero"), value: json!("x") },
            Patch::SetIfMissing { path: path("empty"), value: json!("x") },
            Patch::SetIfMissing { path: path("gone"), value: json!("x") },
            Patch::SetIfMissing { path: path("fresh"), value: json!("x") },
        ];
        let out = apply_patches(&doc, &patches).unwrap();
        assert_eq!(
            out,
            json!({"kept": false, "zero": 0, "empty": "", "gone": "x", "fresh": "x"})
        );
    }

    #[test]
    fn set_if_missing_is_idempotent() {
        let doc = json!({"a": null});
        let patch = Patch::SetIfMissing { path: path("a"), value: json!(7) };
        let once = apply_patches(&doc, &[patch.clone()]).unwrap();
        let twice = apply_patches(&once, &[patch]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unset_removes_fields_and_items() {
        let doc = json!({"a": {"b": 1, "c": 2}, "xs": [10, 20, 30]});
        let out = apply_patches(&doc, &[Patch::Unset { path: path("a.b") }]).unwrap();
        assert_eq!(out["a"], json!({"c": 2}));

        let out = apply_patches(&doc, &[Patch::Unset { path: path("xs[1]") }]).unwrap();
        assert_eq!(out["xs"], json!([10, 30]));

        // Absent target: no-op, not an error.
        let out = apply_patches(&doc, &[Patch::Unset { path: path("nope") }]).unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn unset_multi_index_removes_every_match() {
        let doc = json!({"xs": [{"p": "X"}, {"p": "keep"}, {"p": "X"}]});
        let out = apply_patches(&doc, &[Patch::Unset { path: path("xs[p==\"X\"]") }]).unwrap();
        assert_eq!(out["xs"], json!([{"p": "keep"}]));
    }

    #[test]
    fn inc_and_dec() {
        let doc = json!({"n": 10, "f": 1.5});
        let out = apply_patches(
            &doc,
            &[
                Patch::Inc { path: path("n"), amount: 5.0 },
                Patch::Dec { path: path("f"), amount: 0.5 },
            ],
        )
        .unwrap();
        assert_eq!(out, json!({"n": 15, "f": 1.0}));
    }

    #[test]
    fn inc_on_non_number_is_a_type_mismatch() {
        let doc = json!({"s": "nope"});
        let err = apply_patches(&doc, &[Patch::Inc { path: path("s"), amount: 1.0 }]).unwrap_err();
        assert!(matches!(err, PatchError::TypeMismatch { .. }));
    }

    #[test]
    fn set_if_missing_then_inc_in_one_mutation() {
        let doc = json!({});
        let out = apply_patches(
            &doc,
            &[
                Patch::SetIfMissing { path: path("count"), value: json!(0) },
                Patch::Inc { path: path("count"), amount: 1.0 },
            ],
        )
        .unwrap();
        assert_eq!(out, json!({"count": 1}));
    }

    #[test]
    fn insert_after_index() {
        let doc = json!({"xs": [0, 1, 2, 3, 4]});
        let out = apply_patches(
            &doc,
            &[Patch::Insert {
                position: InsertPosition::After,
                reference: path("xs[2]"),
                items: vec![json!(-1), json!(-2)],
            }],
        )
        .unwrap();
        assert_eq!(out["xs"], json!([0, 1, 2, -1, -2, 3, 4]));
    }

    #[test]
    fn insert_after_minus_one_appends_to_empty_array() {
        let doc = json!({"xs": []});
        let out = apply_patches(
            &doc,
            &[Patch::Insert {
                position: InsertPosition::After,
                reference: path("xs[-1]"),
                items: vec![json!(-1), json!(-2)],
            }],
        )
        .unwrap();
        assert_eq!(out["xs"], json!([-1, -2]));
    }

    #[test]
    fn insert_by_key_reference() {
        let doc = json!({"xs": [{"_key": "a"}, {"_key": "b"}]});
        let out = apply_patches(
            &doc,
            &[Patch::Insert {
                position: InsertPosition::Before,
                reference: path("xs[_key==\"b\"]"),
                items: vec![json!({"_key": "new"})],
            }],
        )
        .unwrap();
        assert_eq!(
            out["xs"],
            json!([{"_key": "a"}, {"_key": "new"}, {"_key": "b"}])
        );
    }

    #[test]
    fn insert_into_non_array_is_an_error() {
        let doc = json!({"s": "text"});
        let err = apply_patches(
            &doc,
            &[Patch::Insert {
                position: InsertPosition::After,
                reference: path("s[-1]"),
                items: vec![json!(1)],
            }],
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::InvalidInsert { .. }));
    }

    #[test]
    fn recursive_set_if_missing_touches_only_lacking_items() {
        let doc = json!({
            "rows": [{"p": "X"}, {"p": "X", "a": "keep"}],
            "nested": {"inner": [{"p": "X"}, {"p": "other"}]}
        });
        let out = apply_patches(
            &doc,
            &[Patch::SetIfMissing { path: path("..[p==\"X\"].a"), value: json!("added") }],
        )
        .unwrap();
        assert_eq!(
            out,
            json!({
                "rows": [{"p": "X", "a": "added"}, {"p": "X", "a": "keep"}],
                "nested": {"inner": [{"p": "X", "a": "added"}, {"p": "other"}]}
            })
        );
    }

    #[test]
    fn diff_text_patch_applies_and_conflicts() {
        let doc = json!({"body": "the quick brown fox"});
        let patch = Patch::DiffTextPatch {
            path: path("body"),
            patch: "@@ -13,7 +13,7 @@\n own \n-fox\n+cat\n".to_string(),
        };
        let out = apply_patches(&doc, &[patch.clone()]).unwrap();
        assert_eq!(out["body"], json!("the quick brown cat"));

        let stale = json!({"body": "something else entirely"});
        let err = apply_patches(&stale, &[patch]).unwrap_err();
        assert!(matches!(err, PatchError::PatchConflict { .. }));
    }

    #[test]
    fn diff_text_patch_on_non_string_is_a_type_mismatch() {
        let doc = json!({"body": 42});
        let err = apply_patches(
            &doc,
            &[Patch::DiffTextPatch { path: path("body"), patch: "@@ -1 +1 @@\n-4\n+5\n".into() }],
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::TypeMismatch { .. }));
    }

    #[test]
    fn failed_patch_leaves_input_untouched() {
        let doc = json!({"a": 1, "s": "text"});
        let before = doc.clone();
        let result = apply_patches(
            &doc,
            &[
                set("a", json!(2)),
                Patch::Inc { path: path("s"), amount: 1.0 },
            ],
        );
        assert!(result.is_err());
        assert_eq!(doc, before);
    }
}
