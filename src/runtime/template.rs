/// Template resolution over accumulated step outputs
///
/// Node config strings may embed `{{path.to.value}}` placeholders, resolved
/// against the outputs of previously succeeded steps, and `{{json path}}`
/// placeholders that splice the JSON-serialized form of a value into the
/// text. Substitution is purely textual; an unresolved path is an error, so
/// a placeholder can never leak through to an outbound request as literal
/// `{{...}}` text.

use serde_json::Value;

use crate::error::EngineError;

/// Resolve every `{{...}}` placeholder in `template` against `scope`
///
/// `scope` is an object mapping node output keys (alias or id) to that
/// node's output value. Paths are dot-separated, first segment selecting the
/// node, the rest descending into its output.
pub fn resolve(template: &str, scope: &Value) -> Result<String, EngineError> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}}") else {
            return Err(EngineError::TemplateResolution {
                path: after_open.trim().to_string(),
            });
        };

        let inner = after_open[..end].trim();
        let (json_mode, path) = match inner.strip_prefix("json ") {
            Some(path) => (true, path.trim()),
            None => (false, inner),
        };

        let value = lookup(scope, path).ok_or_else(|| EngineError::TemplateResolution {
            path: path.to_string(),
        })?;

        if json_mode {
            result.push_str(&serde_json::to_string(value)?);
        } else {
            result.push_str(&stringify(value)?);
        }

        rest = &after_open[end + 2..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Walk a dot-separated path into the scope object
fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = scope;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// String form of a value: strings verbatim, everything else JSON-rendered
fn stringify(value: &Value) -> Result<String, EngineError> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_passes_through() {
        let scope = json!({});
        assert_eq!(resolve("no placeholders here", &scope).unwrap(), "no placeholders here");
    }

    #[test]
    fn nested_path_resolves_to_string_form() {
        let scope = json!({"a": {"b": "x"}});
        assert_eq!(resolve("{{a.b}}", &scope).unwrap(), "x");
    }

    #[test]
    fn json_mode_serializes_structured_values() {
        let scope = json!({"a": {"b": "x"}});
        assert_eq!(resolve("{{json a}}", &scope).unwrap(), r#"{"b":"x"}"#);
    }

    #[test]
    fn mixed_text_and_placeholders() {
        let scope = json!({"trigger": {"timestamp": "2024-01-01T00:00:00Z"}});
        let resolved =
            resolve("https://api.example.com/events?since={{trigger.timestamp}}", &scope).unwrap();
        assert_eq!(
            resolved,
            "https://api.example.com/events?since=2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn numbers_and_bools_render_bare() {
        let scope = json!({"http": {"status": 200, "ok": true}});
        assert_eq!(resolve("{{http.status}}-{{http.ok}}", &scope).unwrap(), "200-true");
    }

    #[test]
    fn missing_path_is_an_error_naming_the_path() {
        let scope = json!({"a": {"b": "x"}});
        match resolve("{{a.c}}", &scope) {
            Err(EngineError::TemplateResolution { path }) => assert_eq!(path, "a.c"),
            other => panic!("expected template error, got {:?}", other),
        }
    }

    #[test]
    fn placeholder_never_leaks_as_literal_text() {
        let scope = json!({});
        assert!(resolve("prefix {{ghost.value}} suffix", &scope).is_err());
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        let scope = json!({"a": "x"});
        assert!(matches!(
            resolve("broken {{a", &scope),
            Err(EngineError::TemplateResolution { .. })
        ));
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let scope = json!({"a": {"b": 7}});
        assert_eq!(resolve("{{ a.b }}", &scope).unwrap(), "7");
        assert_eq!(resolve("{{ json a }}", &scope).unwrap(), r#"{"b":7}"#);
    }
}
