use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Extract the first value found under `name` anywhere in the document.
///
/// Scalars are returned as their text representation; containers flatten to
/// the concatenated text of their scalar descendants, so a non-empty array
/// under the key reads back as non-empty text. Malformed JSON or a missing
/// key yields an empty string, never an error.
#[must_use]
pub fn field(json: &str, name: &str) -> String {
    match serde_json::from_str::<Value>(json) {
        Ok(value) => match find_field(&value, name) {
            Some(hit) => hit,
            None => {
                warn!(field = name, "Field not found in response body");
                String::new()
            }
        },
        Err(err) => {
            warn!(field = name, error = %err, "Unparseable response body");
            String::new()
        }
    }
}

/// Collect every `img` value in the document, keyed by its enclosing key.
///
/// The enrollment response nests one object per token type, e.g.
/// `{"googleurl": {"img": "data:image/png;base64,..."}}`, so the result maps
/// token type to QR payload. Malformed JSON yields an empty map.
#[must_use]
pub fn images(json: &str) -> HashMap<String, String> {
    let mut found = HashMap::new();

    match serde_json::from_str::<Value>(json) {
        Ok(value) => collect_images(&value, None, &mut found),
        Err(err) => {
            warn!(error = %err, "Unparseable enrollment response body");
        }
    }

    found
}

fn find_field(value: &Value, name: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key == name {
                    return Some(flatten(nested));
                }
                if let Some(hit) = find_field(nested, name) {
                    return Some(hit);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|item| find_field(item, name)),
        _ => None,
    }
}

// Concatenated scalar text of a subtree, document order.
fn flatten(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(flatten).collect(),
        Value::Object(map) => map.values().map(flatten).collect(),
    }
}

fn collect_images(value: &Value, parent: Option<&str>, found: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key == "img" {
                    if let Some(img) = nested.as_str() {
                        found.insert(parent.unwrap_or_default().to_string(), img.to_string());
                    }
                }
                collect_images(nested, Some(key), found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_images(item, parent, found);
            }
        }
        _ => {}
    }
}
