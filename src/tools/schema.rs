//! Argument validation against a tool's JSON schema.
//!
//! Covers the subset of JSON Schema that tool definitions use: `type`,
//! `required`, `properties`, `items`, `enum`, numeric `minimum`/`maximum`
//! and string `minLength`/`maxLength`. Unknown keywords are ignored, as are
//! properties the schema does not mention.

use serde_json::Value;

/// Validate `args` against `schema`, collecting every violation.
///
/// Returns an empty list when the arguments are acceptable.
pub fn validate_args(args: &Value, schema: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    check(args, schema, "", &mut violations);
    violations
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn child_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}

fn check(value: &Value, schema: &Value, path: &str, out: &mut Vec<String>) {
    let at = if path.is_empty() { "arguments" } else { path };

    // "type" may be a single name or a list of accepted names
    let type_ok = match schema.get("type") {
        Some(Value::String(t)) => type_matches(value, t),
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(Value::as_str)
            .any(|t| type_matches(value, t)),
        _ => true,
    };
    if !type_ok {
        let expected = match schema.get("type") {
            Some(Value::String(t)) => t.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        out.push(format!("{}: expected {}", at, expected));
        return;
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let options = allowed
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            out.push(format!("{}: must be one of [{}]", at, options));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                out.push(format!("{}: {} is below the minimum {}", at, n, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                out.push(format!("{}: {} is above the maximum {}", at, n, max));
            }
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                out.push(format!("{}: shorter than {} characters", at, min));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                out.push(format!("{}: longer than {} characters", at, max));
            }
        }
    }

    if let Some(obj) = value.as_object() {
        for field in schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            if !obj.contains_key(field) {
                out.push(format!("{}: missing required field", child_path(path, field)));
            }
        }
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop_schema) in props {
                if let Some(prop) = obj.get(name) {
                    check(prop, prop_schema, &child_path(path, name), out);
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check(item, item_schema, &format!("{}[{}]", at, i), out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                "mode": {"type": "string", "enum": ["text", "json"]},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn test_valid_args() {
        let args = json!({"path": "a.txt", "limit": 5, "mode": "json", "extra": true});
        assert!(validate_args(&args, &path_schema()).is_empty());
    }

    #[test]
    fn test_missing_required() {
        let errors = validate_args(&json!({}), &path_schema());
        assert_eq!(errors, vec!["path: missing required field".to_string()]);
    }

    #[test]
    fn test_wrong_types() {
        let errors = validate_args(&json!({"path": 3, "limit": "ten"}), &path_schema());
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e == "path: expected string"));
        assert!(errors.iter().any(|e| e == "limit: expected integer"));
    }

    #[test]
    fn test_non_object_arguments() {
        let errors = validate_args(&json!("{path:"), &path_schema());
        assert_eq!(errors, vec!["arguments: expected object".to_string()]);
    }

    #[test]
    fn test_enum_and_ranges() {
        let errors = validate_args(
            &json!({"path": "", "limit": 500, "mode": "xml"}),
            &path_schema(),
        );
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("one of")));
        assert!(errors.iter().any(|e| e.contains("maximum")));
        assert!(errors.iter().any(|e| e.contains("shorter than")));
    }

    #[test]
    fn test_array_items() {
        let errors = validate_args(&json!({"path": "x", "tags": ["a", 2]}), &path_schema());
        assert_eq!(errors, vec!["tags[1]: expected string".to_string()]);
    }

    #[test]
    fn test_type_list() {
        let schema = json!({"type": ["string", "null"]});
        assert!(validate_args(&json!(null), &schema).is_empty());
        assert_eq!(validate_args(&json!(1), &schema).len(), 1);
    }
}
