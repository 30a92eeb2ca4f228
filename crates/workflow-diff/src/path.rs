//! Dotted-path assignment into JSON values
//!
//! Paths look like `parameters.url` or `parameters.rules.rules[0]`. Each
//! segment may carry one array index. Missing objects along the way are
//! created. An index either replaces an existing element or appends one
//! right after the last; anything further out is an error.

use serde_json::{Map, Value};

use crate::error::{DiffError, Result};

#[derive(Debug, PartialEq)]
struct Segment<'p> {
    key: &'p str,
    index: Option<usize>,
}

fn parse_path(path: &str) -> Result<Vec<Segment<'_>>> {
    path.split('.').map(|raw| parse_segment(path, raw)).collect()
}

fn parse_segment<'p>(path: &str, raw: &'p str) -> Result<Segment<'p>> {
    let invalid = || DiffError::apply(format!("Invalid property path \"{}\"", path));

    let segment = match raw.strip_suffix(']') {
        Some(head) => {
            let (key, index) = head.split_once('[').ok_or_else(invalid)?;
            let index = index.parse::<usize>().map_err(|_| invalid())?;
            Segment {
                key,
                index: Some(index),
            }
        }
        None => Segment {
            key: raw,
            index: None,
        },
    };

    if segment.key.is_empty() || segment.key.contains('[') {
        return Err(invalid());
    }
    Ok(segment)
}

/// Assign `value` at `path` inside `root`
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments = parse_path(path)?;
    assign(root, &segments, value, path)
}

fn ensure_object<'v>(value: &'v mut Value, path: &str) -> Result<&'v mut Map<String, Value>> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value
        .as_object_mut()
        .ok_or_else(|| DiffError::apply(format!("Cannot assign \"{}\"", path)))
}

fn assign(current: &mut Value, segments: &[Segment<'_>], value: Value, path: &str) -> Result<()> {
    let Some((segment, rest)) = segments.split_first() else {
        *current = value;
        return Ok(());
    };
    let map = ensure_object(current, path)?;

    let Some(index) = segment.index else {
        if rest.is_empty() {
            map.insert(segment.key.to_string(), value);
            return Ok(());
        }
        let child = map.entry(segment.key.to_string()).or_insert(Value::Null);
        return assign(child, rest, value, path);
    };

    let child = map
        .entry(segment.key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    let items = child.as_array_mut().ok_or_else(|| {
        DiffError::apply(format!(
            "Cannot assign \"{}\": \"{}\" is not an array",
            path, segment.key
        ))
    })?;
    if index == items.len() {
        items.push(Value::Null);
    }
    let len = items.len();
    let item = items.get_mut(index).ok_or_else(|| {
        DiffError::apply(format!(
            "Cannot assign \"{}\": index {} is past the end of \"{}\" (length {})",
            path,
            index,
            segment.key,
            len
        ))
    })?;
    assign(item, rest, value, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_segments() {
        assert_eq!(
            parse_path("rules.rules[2]").unwrap(),
            vec![
                Segment { key: "rules", index: None },
                Segment { key: "rules", index: Some(2) }
            ]
        );
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("[0]").is_err());
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut node = json!({"name": "HTTP", "parameters": {}});
        set_path(&mut node, "parameters.options.timeout", json!(5000)).unwrap();
        assert_eq!(node["parameters"]["options"]["timeout"], json!(5000));
        assert_eq!(node["name"], json!("HTTP"));
    }

    #[test]
    fn test_set_replaces_scalar_on_the_way() {
        let mut node = json!({"parameters": "oops"});
        set_path(&mut node, "parameters.url", json!("https://example.com")).unwrap();
        assert_eq!(node["parameters"], json!({"url": "https://example.com"}));
    }

    #[test]
    fn test_set_array_element() {
        let mut node = json!({"parameters": {"rules": {"rules": [{"a": 1}]}}});
        set_path(&mut node, "parameters.rules.rules[0]", json!({"b": 2})).unwrap();
        set_path(&mut node, "parameters.rules.rules[1].c", json!(3)).unwrap();
        assert_eq!(
            node["parameters"]["rules"]["rules"],
            json!([{"b": 2}, {"c": 3}])
        );

        set_path(&mut node, "parameters.values[0]", json!("first")).unwrap();
        assert_eq!(node["parameters"]["values"], json!(["first"]));
    }

    #[test]
    fn test_index_past_end_fails() {
        let mut node = json!({"parameters": {"values": [1]}});
        let before = node.clone();
        assert!(matches!(
            set_path(&mut node, "parameters.values[2]", json!(3)),
            Err(DiffError::Apply(_))
        ));
        let huge = "parameters.values[18446744073709551615]";
        assert!(set_path(&mut node, huge, json!(1)).is_err());
        assert!(set_path(&mut node, "parameters.fresh[5]", json!(1)).is_err());
        assert_eq!(node["parameters"]["values"], before["parameters"]["values"]);
    }

    #[test]
    fn test_index_into_non_array_fails() {
        let mut node = json!({"parameters": {"rules": "text"}});
        assert!(set_path(&mut node, "parameters.rules[0]", json!(1)).is_err());
    }
}
