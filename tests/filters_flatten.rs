// tests/filters_flatten.rs
use serde_json::json;

use rulebook_events::filters::flatten;

fn paths(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn matched_keys_are_flattened_into_siblings() {
    let event = json!({
        "alerts": [
            {"labels": {"instance": "10.0.0.1:9100"}, "firing": true}
        ],
        "status": "firing"
    });
    let out = flatten::apply(event, &paths(&["alert*"]));

    assert_eq!(out["alerts_0_labels_instance"], json!("10.0.0.1:9100"));
    assert_eq!(out["alerts_0_firing"], json!(true));
    // the original nested value stays in place
    assert_eq!(out["alerts"][0]["firing"], json!(true));
    assert_eq!(out["status"], json!("firing"));
}

#[test]
fn non_matching_objects_are_searched_recursively() {
    let event = json!({
        "outer": {
            "details": {"kind": {"code": 7}}
        }
    });
    let out = flatten::apply(event, &paths(&["kind"]));
    assert_eq!(out["outer"]["details"]["kind_code"], json!(7));
}

#[test]
fn no_patterns_means_no_change() {
    let event = json!({"a": {"b": 1}});
    assert_eq!(flatten::apply(event.clone(), &[]), event);
}

#[test]
fn question_mark_matches_a_single_character() {
    let event = json!({"v1": {"x": 1}, "v12": {"x": 2}});
    let out = flatten::apply(event, &paths(&["v?"]));
    assert_eq!(out["v1_x"], json!(1));
    assert!(out.get("v12_x").is_none());
}

#[test]
fn objects_inside_arrays_are_not_searched() {
    let event = json!({"list": [{"kind": {"code": 7}}]});
    let out = flatten::apply(event.clone(), &paths(&["kind"]));
    assert_eq!(out, event);
}
