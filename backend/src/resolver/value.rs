// Total accessors over semi-structured JSON. None of these panic or error:
// anything absent or of the wrong shape comes back as None.

use serde_json::Value;

/// Descends one key per segment. Numeric segments index into arrays.
pub fn lookup<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        other => Some(other),
    }
}

pub fn lookup_str<'a>(root: &'a Value, dotted: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = dotted.split('.').collect();
    lookup(root, &segments)
}

/// String form of a scalar. Containers are rendered as compact JSON.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Non-empty trimmed text, or None.
pub fn as_non_empty_text(value: &Value) -> Option<String> {
    as_text(value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        _ => None,
    }
}

pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        _ => false,
    }
}

/// Name/value pairs from either `[{"name": .., "value": ..}]` or `{"name": value}`.
pub fn named_entries(value: &Value) -> Vec<(String, &Value)> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let name = item
                    .get("name")
                    .or_else(|| item.get("field"))
                    .or_else(|| item.get("key"))
                    .and_then(Value::as_str)?;
                let value = item.get("value").or_else(|| item.get("default_value"))?;
                Some((name.to_string(), value))
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// First entry whose name matches one of `names` (case-insensitive).
pub fn find_named<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    named_entries(value)
        .into_iter()
        .find(|(name, v)| names.iter().any(|n| n.eq_ignore_ascii_case(name)) && !is_blank(Some(*v)))
        .map(|(_, v)| v)
}

/// Dotted paths of every scalar leaf, descending at most `max_depth` levels.
pub fn discover_fields(root: &Value, max_depth: usize) -> Vec<(String, &Value)> {
    let mut found = Vec::new();
    collect_fields(root, "", 1, max_depth, &mut found);
    found
}

fn collect_fields<'a>(
    value: &'a Value,
    prefix: &str,
    depth: usize,
    max_depth: usize,
    found: &mut Vec<(String, &'a Value)>,
) {
    let Value::Object(map) = value else {
        return;
    };
    if depth > max_depth {
        return;
    }

    for (key, child) in map {
        let path = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
        match child {
            Value::Object(_) => collect_fields(child, &path, depth + 1, max_depth, found),
            Value::Array(_) | Value::Null => {}
            scalar => found.push((path, scalar)),
        }
    }
}
