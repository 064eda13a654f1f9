//! Dotted-path field extraction used by `Simple` filters, and a minimal
//! JSONPath-ish evaluator used by `JsonPath` filters.

use serde_json::Value;

/// Extracts the value at a dotted field path (e.g. `"actor.user_id"` or
/// `"payload.amount"`) out of a JSON value, walking objects by key and
/// arrays by numeric index. Returns `None` if any segment is missing.
pub fn get_field_value<'a>(root: &'a Value, field_path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in field_path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluates a minimal JSONPath-like expression starting with `$`,
/// supporting dotted field access, `[*]` wildcard expansion over arrays,
/// and `[idx]` numeric indexing. Returns every matching value (more than
/// one when a `[*]` segment was traversed).
pub fn evaluate_json_path<'a>(root: &'a Value, expr: &str) -> Vec<&'a Value> {
    let expr = expr.strip_prefix('$').unwrap_or(expr);
    let segments = tokenize(expr);
    let mut current: Vec<&'a Value> = vec![root];

    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match &segment {
                Segment::Field(name) => {
                    if let Value::Object(map) = value {
                        if let Some(v) = map.get(name) {
                            next.push(v);
                        }
                    }
                }
                Segment::Index(idx) => {
                    if let Value::Array(items) = value {
                        if let Some(v) = items.get(*idx) {
                            next.push(v);
                        }
                    }
                }
                Segment::Wildcard => {
                    if let Value::Array(items) = value {
                        next.extend(items.iter());
                    } else if let Value::Object(map) = value {
                        next.extend(map.values());
                    }
                }
            }
        }
        current = next;
    }

    current
}

enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

fn tokenize(expr: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for raw in expr.split('.') {
        if raw.is_empty() {
            continue;
        }
        let mut rest = raw;
        // A dotted part may be "name[*]" or "name[3]" or "[*]"/"[3]" alone.
        if let Some(bracket_start) = rest.find('[') {
            let (name, bracket_part) = rest.split_at(bracket_start);
            if !name.is_empty() {
                segments.push(Segment::Field(name.to_string()));
            }
            rest = bracket_part;
            while let Some(close) = rest.find(']') {
                let inner = &rest[1..close];
                if inner == "*" {
                    segments.push(Segment::Wildcard);
                } else if let Ok(idx) = inner.parse::<usize>() {
                    segments.push(Segment::Index(idx));
                }
                rest = &rest[close + 1..];
            }
        } else {
            segments.push(Segment::Field(rest.to_string()));
        }
    }
    segments
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_field_path_walks_objects_and_arrays() {
        let v = json!({"a": {"b": [10, 20, 30]}});
        assert_eq!(get_field_value(&v, "a.b.1"), Some(&json!(20)));
        assert_eq!(get_field_value(&v, "a.missing"), None);
    }

    #[test]
    fn json_path_wildcard_expands_array() {
        let v = json!({"items": [{"x": 1}, {"x": 2}, {"x": 3}]});
        let matched = evaluate_json_path(&v, "$.items[*].x");
        assert_eq!(matched, vec![&json!(1), &json!(2), &json!(3)]);
    }

    #[test]
    fn json_path_index_selects_one_element() {
        let v = json!({"items": [10, 20, 30]});
        let matched = evaluate_json_path(&v, "$.items[1]");
        assert_eq!(matched, vec![&json!(20)]);
    }
}
