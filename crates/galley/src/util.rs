//! Small shared helpers: identifiers and array-key backfill.

use rand::Rng;
use serde_json::Value;

use galley_json_match::KEY_FIELD;

/// Generate a random lowercase-hex key of `len` characters, the format used
/// for array item `_key`s.
pub fn random_key(len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect()
}

/// Generate a transaction identifier.
pub fn transaction_id() -> String {
    format!("txn-{}", random_key(16))
}

/// Walk `value` and give every object item of every array a `_key`, leaving
/// already-keyed items untouched. Arrays containing no object items are left
/// as-is (arrays of scalars never carry keys).
pub fn ensure_array_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                ensure_array_keys(child);
            }
        }
        Value::Array(array) => {
            for item in array.iter_mut() {
                ensure_array_keys(item);
            }
            if array.iter().any(Value::is_object) {
                for item in array.iter_mut() {
                    if let Value::Object(map) = item {
                        let keyed = map.get(KEY_FIELD).is_some_and(Value::is_string);
                        if !keyed {
                            map.insert(KEY_FIELD.to_string(), Value::String(random_key(12)));
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_backfilled_only_for_object_items() {
        let mut doc = json!({
            "scalars": [1, 2, 3],
            "mixed": [{"_key": "keep"}, {"fresh": true}],
        });
        ensure_array_keys(&mut doc);
        assert_eq!(doc["scalars"], json!([1, 2, 3]));
        assert_eq!(doc["mixed"][0]["_key"], json!("keep"));
        let fresh = doc["mixed"][1]["_key"].as_str().unwrap();
        assert_eq!(fresh.len(), 12);
        assert!(fresh.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn transaction_ids_are_unique_enough() {
        assert_ne!(transaction_id(), transaction_id());
    }
}
