use serde_json::Value;

/// Contains 操作符
pub fn contains(value: &Value, target: &Value) -> bool {
    match (value, target) {
        (Value::String(s), Value::String(t)) => s.contains(t.as_str()),
        (Value::String(s), Value::Number(n)) => s.contains(&n.to_string()),
        (Value::Array(arr), target) => arr.iter().any(|item| equal(item, target)),
        (Value::Object(obj), Value::String(key)) => obj.contains_key(key),
        _ => false,
    }
}

/// Equal 操作符
pub fn equal(value: &Value, target: &Value) -> bool {
    // 相同类型直接比较
    if value == target {
        return true;
    }

    // 尝试类型转换后比较
    match (value, target) {
        // 数字比较（处理 int vs float）
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        // 字符串与数字比较
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            match s.trim().parse::<f64>() {
                Ok(parsed) => Some(parsed) == n.as_f64(),
                Err(_) => false,
            }
        }
        // 布尔与字符串比较
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            match s.to_lowercase().as_str() {
                "true" => *b,
                "false" => !*b,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Numeric view of a value; numeric strings count.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Ordering of two values when both are numeric.
pub fn compare_numbers(value: &Value, target: &Value) -> Option<std::cmp::Ordering> {
    let a = as_number(value)?;
    let b = as_number(target)?;
    a.partial_cmp(&b)
}

/// Truthiness used by bare field references in conditions.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}
