//! Wire codec for patches.
//!
//! One patch serializes to `{"type": ..., "path": ..., ...}` with the
//! operation's parameters flattened beside it. `inc`/`dec` amounts and
//! `diffTextPatch` diffs travel in the `value` field; `insert` carries
//! `position` and `items`. Paths accept both wire forms (see
//! `galley_json_match::Path`) and re-serialize in canonical string form.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use galley_json_match::Path;

use super::types::{InsertPosition, Patch};

impl Serialize for InsertPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InsertPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match String::deserialize(deserializer)?.as_str() {
            "before" => Ok(InsertPosition::Before),
            "after" => Ok(InsertPosition::After),
            other => Err(de::Error::custom(format!("unknown insert position `{other}`"))),
        }
    }
}

impl Serialize for Patch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.op_name())?;
        match self {
            Patch::Replace { path, value }
            | Patch::Set { path, value }
            | Patch::SetIfMissing { path, value } => {
                map.serialize_entry("path", path)?;
                map.serialize_entry("value", value)?;
            }
            Patch::Unset { path } => {
                map.serialize_entry("path", path)?;
            }
            Patch::Inc { path, amount } | Patch::Dec { path, amount } => {
                map.serialize_entry("path", path)?;
                map.serialize_entry("value", amount)?;
            }
            Patch::Insert { position, reference, items } => {
                map.serialize_entry("path", reference)?;
                map.serialize_entry("position", position)?;
                map.serialize_entry("items", items)?;
            }
            Patch::DiffTextPatch { path, patch } => {
                map.serialize_entry("path", path)?;
                map.serialize_entry("value", patch)?;
            }
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct PatchWire {
    #[serde(rename = "type")]
    kind: String,
    path: Path,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    position: Option<InsertPosition>,
    #[serde(default)]
    items: Option<Vec<Value>>,
}

impl<'de> Deserialize<'de> for Patch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = PatchWire::deserialize(deserializer)?;
        let PatchWire { kind, path, value, position, items } = wire;

        let require_value = |value: Option<Value>| {
            value.ok_or_else(|| de::Error::custom(format!("`{kind}` patch is missing `value`")))
        };

        match kind.as_str() {
            "replace" => Ok(Patch::Replace { path, value: require_value(value)? }),
            "set" => Ok(Patch::Set { path, value: require_value(value)? }),
            "setIfMissing" => Ok(Patch::SetIfMissing { path, value: require_value(value)? }),
            "unset" => Ok(Patch::Unset { path }),
            "inc" | "dec" => {
                let amount = require_value(value)?
                    .as_f64()
                    .ok_or_else(|| de::Error::custom(format!("`{kind}` value must be a number")))?;
                if kind == "inc" {
                    Ok(Patch::Inc { path, amount })
                } else {
                    Ok(Patch::Dec { path, amount })
                }
            }
            "insert" => {
                let position = position
                    .ok_or_else(|| de::Error::custom("`insert` patch is missing `position`"))?;
                let items =
                    items.ok_or_else(|| de::Error::custom("`insert` patch is missing `items`"))?;
                Ok(Patch::Insert { position, reference: path, items })
            }
            "diffTextPatch" => match require_value(value)? {
                Value::String(patch) => Ok(Patch::DiffTextPatch { path, patch }),
                _ => Err(de::Error::custom("`diffTextPatch` value must be a string")),
            },
            other => Err(de::Error::custom(format!("unknown patch type `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_round_trips() {
        let wire = json!({"type": "set", "path": "a.b[2]", "value": 7});
        let patch: Patch = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(
            patch,
            Patch::Set { path: Path::parse("a.b[2]").unwrap(), value: json!(7) }
        );
        assert_eq!(serde_json::to_value(&patch).unwrap(), wire);
    }

    #[test]
    fn insert_carries_position_and_items() {
        let wire = json!({
            "type": "insert",
            "path": "xs[-1]",
            "position": "after",
            "items": [1, 2]
        });
        let patch: Patch = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(
            patch,
            Patch::Insert {
                position: InsertPosition::After,
                reference: Path::parse("xs[-1]").unwrap(),
                items: vec![json!(1), json!(2)],
            }
        );
        assert_eq!(serde_json::to_value(&patch).unwrap(), wire);
    }

    #[test]
    fn structured_path_form_is_accepted() {
        let wire = json!({"type": "unset", "path": ["a", 0]});
        let patch: Patch = serde_json::from_value(wire).unwrap();
        assert_eq!(patch, Patch::Unset { path: Path::parse("a[0]").unwrap() });
    }

    #[test]
    fn unknown_type_is_rejected() {
        let wire = json!({"type": "explode", "path": "a"});
        assert!(serde_json::from_value::<Patch>(wire).is_err());
    }

    #[test]
    fn inc_value_rides_in_value_field() {
        let wire = json!({"type": "dec", "path": "n", "value": 2});
        let patch: Patch = serde_json::from_value(wire).unwrap();
        assert_eq!(patch, Patch::Dec { path: Path::parse("n").unwrap(), amount: 2.0 });
    }
}
