//! End-to-end matrix over the expression grammar and resolver: parse a
//! string expression, resolve it against a fixture document, and check the
//! values the targets point at.

use galley_json_match::{locate, resolve, util, Path, Step, Target};
use serde_json::{json, Value};

fn fixture() -> Value {
    json!({
        "title": "front page",
        "count": 3,
        "sections": [
            {"_key": "intro", "heading": "Intro", "tags": ["a", "b"]},
            {"_key": "body", "heading": "Body", "blocks": [
                {"_key": "b1", "kind": "text", "text": "hello"},
                {"_key": "b2", "kind": "image"}
            ]},
        ],
        "meta": {"authors": [{"name": "ada", "role": "editor"}, {"name": "lin", "role": "editor"}]}
    })
}

fn located_values(doc: &Value, expr: &str) -> Vec<Value> {
    let path = Path::parse(expr).unwrap();
    locate(doc, &path)
        .unwrap()
        .into_iter()
        .map(|trace| util::get_at(doc, &trace).unwrap().clone())
        .collect()
}

#[test]
fn simple_attribute_chain() {
    let doc = fixture();
    assert_eq!(located_values(&doc, "title"), vec![json!("front page")]);
    assert_eq!(
        located_values(&doc, "sections[0].heading"),
        vec![json!("Intro")]
    );
}

#[test]
fn keyed_access_is_position_independent() {
    let doc = fixture();
    assert_eq!(
        located_values(&doc, "sections[_key==\"body\"].blocks[_key==\"b1\"].text"),
        vec![json!("hello")]
    );
}

#[test]
fn negative_index_addresses_last_item() {
    let doc = fixture();
    assert_eq!(
        located_values(&doc, "sections[0].tags[-1]"),
        vec![json!("b")]
    );
}

#[test]
fn recursive_filter_collects_all_matches() {
    let doc = fixture();
    assert_eq!(
        located_values(&doc, "..[kind==\"text\"]"),
        vec![json!({"_key": "b1", "kind": "text", "text": "hello"})]
    );
    assert_eq!(
        located_values(&doc, "..[role==\"editor\"].name"),
        vec![json!("ada"), json!("lin")]
    );
}

#[test]
fn filter_target_carries_every_index() {
    let doc = fixture();
    let path = Path::parse("meta.authors[role==\"editor\"]").unwrap();
    let targets = resolve(&doc, &path).unwrap();
    assert_eq!(
        targets,
        vec![Target::Index {
            parent: vec![Step::Field("meta".into()), Step::Field("authors".into())],
            indices: vec![0, 1],
        }]
    );
}

#[test]
fn zero_target_paths_resolve_to_empty_sets() {
    let doc = fixture();
    for expr in ["nope.deep", "sections[9]", "sections[_key==\"zz\"]", "title[0]"] {
        let path = Path::parse(expr).unwrap();
        assert_eq!(resolve(&doc, &path).unwrap(), vec![], "expr: {expr}");
    }
}

#[test]
fn wire_forms_agree() {
    let doc = fixture();
    let from_string: Path = serde_json::from_value(json!("sections[1].blocks[0]")).unwrap();
    let from_array: Path =
        serde_json::from_value(json!(["sections", 1, "blocks", 0])).unwrap();
    assert_eq!(
        locate(&doc, &from_string).unwrap(),
        locate(&doc, &from_array).unwrap()
    );
}
