//! Flatten nested JSON under keys matching shell-style patterns.
//!
//! For every object key matching one of `object_paths` (`*`, `?`, `[...]`
//! wildcards), the nested value is flattened into `key_child_0_field`-style
//! scalar siblings. Non-matching object values are searched recursively;
//! values inside arrays are left alone.

use regex::Regex;
use serde_json::Value;

/// Apply the flattening to one event.
pub fn apply(mut event: Value, object_paths: &[String]) -> Value {
    let patterns: Vec<Regex> = object_paths
        .iter()
        .filter_map(|pattern| match glob_to_regex(pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::warn!(pattern = %pattern, error = %error, "ignoring bad key pattern");
                None
            }
        })
        .collect();
    if patterns.is_empty() {
        return event;
    }
    walk(&mut event, &patterns);
    event
}

fn walk(value: &mut Value, patterns: &[Regex]) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let keys: Vec<String> = obj.keys().cloned().collect();
    for key in keys {
        if patterns.iter().any(|regex| regex.is_match(&key)) {
            let mut flat = Vec::new();
            if let Some(nested) = obj.get(&key) {
                flatten_into(nested, &key, &mut flat);
            }
            for (flat_key, flat_value) in flat {
                obj.insert(flat_key, flat_value);
            }
        } else if let Some(child) = obj.get_mut(&key) {
            walk(child, patterns);
        }
    }
}

/// Collect `prefix_subkey` → scalar pairs; objects recurse by key, arrays by
/// index.
fn flatten_into(value: &Value, prefix: &str, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(nested, &format!("{prefix}_{key}"), out);
            }
        }
        Value::Array(list) => {
            for (index, nested) in list.iter().enumerate() {
                flatten_into(nested, &format!("{prefix}_{index}"), out);
            }
        }
        scalar => out.push((prefix.to_string(), scalar.clone())),
    }
}

/// Translate a shell-style pattern to an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            '[' => {
                translated.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    translated.push('^');
                }
                for inner in chars.by_ref() {
                    translated.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_translation_matches_like_a_shell() {
        let regex = glob_to_regex("alert*").unwrap();
        assert!(regex.is_match("alerts"));
        assert!(regex.is_match("alert"));
        assert!(!regex.is_match("my_alerts"));

        let regex = glob_to_regex("v?").unwrap();
        assert!(regex.is_match("v1"));
        assert!(!regex.is_match("v12"));
    }

    #[test]
    fn dots_in_patterns_are_literal() {
        let regex = glob_to_regex("a.b").unwrap();
        assert!(regex.is_match("a.b"));
        assert!(!regex.is_match("axb"));
    }
}
