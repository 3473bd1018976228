//! Template Interpolation
//!
//! Fills `{field}` placeholders from a provider's profile document.

use serde_json::Value;

/// Interpolate `{field}` placeholders with values from a JSON object.
///
/// Returns `None` when any placeholder has no usable value, so a template
/// such as `https://twitter.com/{screen_name}` never yields a dangling URL.
///
/// # Example
/// ```ignore
/// let data = json!({"username": "alice"});
/// let url = interpolate("https://instagram.com/{username}", &data);
/// // url == Some("https://instagram.com/alice")
/// ```
pub fn interpolate(template: &str, data: &Value) -> Option<String> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let end = start + rest[start..].find('}')?;
        result.push_str(&rest[..start]);
        let key = &rest[start + 1..end];
        result.push_str(&scalar_string(data.get(key)?)?);
        rest = &rest[end + 1..];
    }

    result.push_str(rest);
    Some(result)
}

/// Stringify a scalar JSON value. Empty strings, nulls, arrays and objects
/// yield `None`.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
