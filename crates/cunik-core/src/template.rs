//! Command-line template substitution.
//!
//! A template is plain text with double-quoted regions. A quoted region whose
//! whole content is `{{key}}` is replaced by the value of `key`; everything
//! else, quotes included, is copied through untouched.

use crate::config::Params;
use crate::error::ConfigError;
use serde_json::Value;

/// Fill every quoted `{{key}}` placeholder in `template` from `params`.
pub fn substitute(template: &str, params: &Params) -> Result<String, ConfigError> {
    let segments: Vec<&str> = template.split('"').collect();
    let last = segments.len() - 1;

    let mut filled = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        // First and last segments sit outside any quote pair
        let quoted = i > 0 && i < last;
        match placeholder_key(segment) {
            Some(key) if quoted => {
                let value = params
                    .get(key)
                    .ok_or_else(|| ConfigError::MissingPlaceholder(key.to_string()))?;
                filled.push(render(value));
            }
            _ => filled.push((*segment).to_string()),
        }
    }

    Ok(filled.join("\""))
}

/// Render a parameter value the way it appears on a command line.
pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn placeholder_key(segment: &str) -> Option<&str> {
    segment.strip_prefix("{{")?.strip_suffix("}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_substitute_round_trip() {
        let p = params(json!({"x": "a", "y": "b"}));
        let out = substitute(r#""{{x}}" literal "{{y}}""#, &p).unwrap();
        assert_eq!(out, r#""a" literal "b""#);
    }

    #[test]
    fn test_non_string_values() {
        let p = params(json!({"port": 8080, "debug": true}));
        let out = substitute(r#"--port="{{port}}" --debug="{{debug}}""#, &p).unwrap();
        assert_eq!(out, r#"--port="8080" --debug="true""#);
    }

    #[test]
    fn test_missing_placeholder_names_key() {
        let p = params(json!({"x": "a"}));
        let err = substitute(r#""{{x}}" "{{ipv4_addr}}""#, &p).unwrap_err();
        assert_eq!(err, ConfigError::MissingPlaceholder("ipv4_addr".into()));
    }

    #[test]
    fn test_unquoted_placeholder_is_literal() {
        let p = params(json!({"x": "a"}));
        assert_eq!(substitute("{{x}}", &p).unwrap(), "{{x}}");
        assert_eq!(substitute("run {{x}} now", &p).unwrap(), "run {{x}} now");
    }

    #[test]
    fn test_partial_placeholder_is_literal() {
        let p = params(json!({"x": "a"}));
        let out = substitute(r#""prefix-{{x}}" "{{x}}-suffix""#, &p).unwrap();
        assert_eq!(out, r#""prefix-{{x}}" "{{x}}-suffix""#);
    }

    #[test]
    fn test_literal_text_preserved() {
        let p = Params::new();
        let template = "{\"cmdline\": \"/nginx.conf\", \"net\": {\"if\": \"vioif0\"}}\n";
        assert_eq!(substitute(template, &p).unwrap(), template);
        assert_eq!(substitute("", &p).unwrap(), "");
    }

    #[test]
    fn test_substitute_is_deterministic() {
        let p = params(json!({"ipv4_addr": "10.0.20.1", "mask": "24"}));
        let template = r#"{"net": {"addr": "{{ipv4_addr}}", "mask": "{{mask}}"}}"#;
        let first = substitute(template, &p).unwrap();
        let second = substitute(template, &p).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, r#"{"net": {"addr": "10.0.20.1", "mask": "24"}}"#);
    }
}
