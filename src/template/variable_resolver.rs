use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder pattern is valid"))
}

/// 解析文本中的 {{field}} 变量引用
///
/// Unknown fields render as the empty string. Nothing but lookup and string
/// concatenation happens here.
pub fn render(template: &str, values: &Map<String, Value>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            lookup_path(values, &caps[1])
                .map(display_value)
                .unwrap_or_default()
        })
        .into_owned()
}

/// 提取文本中所有变量引用
pub fn extract_fields(template: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Resolve a dotted path (`a.b.0.c`) against a map. An exact key match wins
/// over path traversal so flat keys containing dots stay addressable.
pub fn lookup_path<'a>(values: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(v) = values.get(path) {
        return Some(v);
    }
    let mut segments = path.split('.');
    let mut current = values.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String form used when a value is spliced into text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_simple() {
        let values = map(json!({"receivedName": "张三", "reply": "好的"}));
        assert_eq!(render("@{{receivedName}} {{reply}}", &values), "@张三 好的");
    }

    #[test]
    fn test_render_nested_and_missing() {
        let values = map(json!({"user": {"name": "Alice", "tags": ["vip"]}}));
        assert_eq!(render("{{ user.name }}/{{user.tags.0}}/{{nope}}", &values), "Alice/vip/");
    }

    #[test]
    fn test_render_non_string_values() {
        let values = map(json!({"level": 2, "flag": true, "none": null}));
        assert_eq!(render("L{{level}} {{flag}} [{{none}}]", &values), "L2 true []");
    }

    #[test]
    fn test_render_without_placeholders_is_identity() {
        let values = Map::new();
        assert_eq!(render("plain text", &values), "plain text");
    }

    #[test]
    fn test_extract_fields() {
        let fields = extract_fields("Hello {{name}}, your ticket {{ ticket.id }}");
        assert_eq!(fields, vec!["name", "ticket.id"]);
    }

    #[test]
    fn test_lookup_prefers_flat_key() {
        let values = map(json!({"a.b": 1, "a": {"b": 2}}));
        assert_eq!(lookup_path(&values, "a.b"), Some(&json!(1)));
    }
}
