//! Dot-path lookups over JSON values, shared by filters and source adapters.

use serde_json::Value;

/// Walk `path` through nested objects using `separator`. An empty path yields
/// the value itself; a missing segment or a non-object intermediate yields
/// `None`.
pub fn get_path<'a>(value: &'a Value, path: &str, separator: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split(separator) {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// [`get_path`] with the conventional `.` separator.
pub fn get_dot_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    get_path(value, path, ".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walks_nested_objects() {
        let v = json!({"labels": {"instance": "10.0.0.1:9100"}});
        assert_eq!(
            get_dot_path(&v, "labels.instance"),
            Some(&json!("10.0.0.1:9100"))
        );
    }

    #[test]
    fn missing_segment_is_none() {
        let v = json!({"labels": {}});
        assert_eq!(get_dot_path(&v, "labels.instance"), None);
        assert_eq!(get_dot_path(&v, "annotations.summary"), None);
    }

    #[test]
    fn custom_separator() {
        let v = json!({"a": {"b": 1}});
        assert_eq!(get_path(&v, "a/b", "/"), Some(&json!(1)));
    }

    #[test]
    fn empty_path_yields_the_value() {
        let v = json!({"a": 1});
        assert_eq!(get_path(&v, "", "."), Some(&v));
    }

    #[test]
    fn scalar_intermediate_is_none() {
        let v = json!({"a": 5});
        assert_eq!(get_dot_path(&v, "a.b"), None);
    }
}
