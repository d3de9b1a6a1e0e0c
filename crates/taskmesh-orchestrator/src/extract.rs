use serde_json::{Map, Value};

/// Keys whose sub-objects carry structured worker output.
const STRUCTURED_KEYS: &[&str] = &["code_files", "analysis_results", "search_results"];

/// Keys under which workers commonly place free-form text.
const TEXT_KEYS: &[&str] = &["text", "content", "answer", "output", "summary"];

/// Content pulled out of a finished task's result, together with the key
/// it was found under.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub key: String,
    pub content: Value,
}

fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn raw_data(result: &Map<String, Value>) -> Option<Extracted> {
    let value = result.get("data")?;
    is_non_empty(value).then(|| Extracted {
        key: "data".to_string(),
        content: value.clone(),
    })
}

fn structured(result: &Map<String, Value>) -> Option<Extracted> {
    STRUCTURED_KEYS.iter().find_map(|&key| {
        let value = result.get(key)?;
        is_non_empty(value).then(|| Extracted {
            key: key.to_string(),
            content: value.clone(),
        })
    })
}

fn free_text(result: &Map<String, Value>) -> Option<Extracted> {
    if let Some(found) = TEXT_KEYS.iter().find_map(|&key| {
        let value = result.get(key)?;
        matches!(value, Value::String(s) if !s.trim().is_empty()).then(|| Extracted {
            key: key.to_string(),
            content: value.clone(),
        })
    }) {
        return Some(found);
    }
    // Fall back to scanning nested objects for the same text keys.
    result.iter().find_map(|(_, value)| {
        value.as_object().and_then(free_text)
    })
}

/// Ordered extractor chain over a task result: raw data first, then known
/// structured sub-objects, then free text. First match wins.
pub fn extract_content(result: &Map<String, Value>) -> Option<Extracted> {
    raw_data(result)
        .or_else(|| structured(result))
        .or_else(|| free_text(result))
}

/// Merge content extracted from a finished dependency into a dependent
/// task's params.
///
/// A key the dependent does not already use is added directly. A key that
/// is present and non-empty is left alone, and the incoming value is filed
/// under `source_tasks[source_role]` instead so nothing is overwritten.
pub fn propagate(
    params: &mut Map<String, Value>,
    source_role: &str,
    extracted: Extracted,
) {
    let occupied = params.get(&extracted.key).is_some_and(is_non_empty);
    if !occupied {
        params.insert(extracted.key, extracted.content);
        return;
    }

    let side_channel = params
        .entry("source_tasks")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(by_role) = side_channel {
        by_role.insert(
            source_role.to_string(),
            Value::Object(Map::from_iter([(extracted.key, extracted.content)])),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn raw_data_wins_over_text() {
        let result = map(json!({"data": {"rows": [1, 2]}, "text": "summary"}));
        let found = extract_content(&result).unwrap();
        assert_eq!(found.key, "data");
        assert_eq!(found.content, json!({"rows": [1, 2]}));
    }

    #[test]
    fn structured_keys_win_over_text() {
        let result = map(json!({"search_results": [{"url": "a"}], "text": "ignored"}));
        let found = extract_content(&result).unwrap();
        assert_eq!(found.key, "search_results");
    }

    #[test]
    fn falls_through_to_free_text() {
        let result = map(json!({"text": "the answer"}));
        let found = extract_content(&result).unwrap();
        assert_eq!(found.key, "text");
        assert_eq!(found.content, json!("the answer"));
    }

    #[test]
    fn finds_text_nested_one_level_down() {
        let result = map(json!({"payload": {"content": "nested"}}));
        let found = extract_content(&result).unwrap();
        assert_eq!(found.key, "content");
    }

    #[test]
    fn empty_and_blank_values_do_not_count() {
        assert!(extract_content(&map(json!({"data": {}, "text": "   "}))).is_none());
        assert!(extract_content(&map(json!({"search_results": []}))).is_none());
        assert!(extract_content(&Map::new()).is_none());
    }

    #[test]
    fn propagate_adds_new_key_directly() {
        let mut params = map(json!({"topic": "rust"}));
        propagate(
            &mut params,
            "search",
            Extracted {
                key: "search_results".into(),
                content: json!([{"url": "a"}]),
            },
        );
        assert_eq!(params["search_results"], json!([{"url": "a"}]));
    }

    #[test]
    fn propagate_preserves_existing_value_via_side_channel() {
        let mut params = map(json!({"text": "caller supplied"}));
        propagate(
            &mut params,
            "writer",
            Extracted {
                key: "text".into(),
                content: json!("from dependency"),
            },
        );
        assert_eq!(params["text"], json!("caller supplied"));
        assert_eq!(
            params["source_tasks"]["writer"]["text"],
            json!("from dependency")
        );
    }

    #[test]
    fn propagate_fills_empty_existing_value() {
        let mut params = map(json!({"text": ""}));
        propagate(
            &mut params,
            "writer",
            Extracted {
                key: "text".into(),
                content: json!("from dependency"),
            },
        );
        assert_eq!(params["text"], json!("from dependency"));
    }
}
