//! Trigger variable resolution against an event.
//!
//! Expressions:
//! - `event.topic`, `event.id`, `event.name`, `event.source`, `event.data_type`,
//!   `event.data` (raw string), `event.timestamp` (RFC 3339)
//! - `event.payload.<key>[.<key>|[n]]...` (`event.data.<key>...` reads the payload too)
//! - `'literal'` or `"literal"`
//! - `a || b`: first alternative that resolves
//!
//! An optional `{{ ... }}` wrapper is ignored.

use reconflow_core::{Event, Trigger};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Name → value computed from a trigger's `vars` for one event.
pub type ResolvedVars = BTreeMap<String, String>;

/// Resolve every declared var. `None` when the trigger declares no vars or
/// none of them resolved; unresolved vars are left out.
pub fn resolve_vars(trigger: &Trigger, event: &Event) -> Option<ResolvedVars> {
    if trigger.vars.is_empty() {
        return None;
    }

    let mut resolved = ResolvedVars::new();
    for (name, expression) in &trigger.vars {
        match evaluate(expression, event) {
            Some(value) => {
                resolved.insert(name.clone(), value);
            }
            None => tracing::debug!(
                "Var '{}' of trigger '{}' did not resolve ({})",
                name,
                trigger.name,
                expression
            ),
        }
    }

    (!resolved.is_empty()).then_some(resolved)
}

/// The scalar input a legacy event trigger extracts: the `input.field` payload
/// path when declared, otherwise the raw data.
pub fn extract_input(trigger: &Trigger, event: &Event) -> String {
    let field = trigger
        .input
        .as_ref()
        .and_then(|i| i.field.as_deref())
        .map(str::trim)
        .filter(|f| !f.is_empty());

    match field {
        Some(field) if field.starts_with("event.") => evaluate(field, event).unwrap_or_default(),
        Some(field) => lookup_path(&event.payload, field)
            .and_then(value_to_string)
            .unwrap_or_default(),
        None => event.data.trim().to_string(),
    }
}

/// Evaluate one expression.
pub fn evaluate(expression: &str, event: &Event) -> Option<String> {
    let expression = strip_braces(expression.trim());
    expression
        .split("||")
        .map(str::trim)
        .find_map(|alt| evaluate_single(alt, event))
}

fn strip_braces(expression: &str) -> &str {
    expression
        .strip_prefix("{{")
        .and_then(|e| e.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(expression)
}

fn evaluate_single(expression: &str, event: &Event) -> Option<String> {
    if let Some(literal) = quoted(expression) {
        return Some(literal.to_string());
    }

    let rest = expression.strip_prefix("event.")?;
    let (head, tail) = match rest.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (rest, None),
    };

    match (head, tail) {
        ("payload" | "data", Some(path)) => {
            lookup_path(&event.payload, path).and_then(value_to_string)
        }
        ("payload", None) => value_to_string(&Value::Object(event.payload.clone())),
        ("data", None) => non_empty(&event.data),
        ("topic", None) => non_empty(&event.topic),
        ("id", None) => non_empty(&event.id),
        ("name", None) => non_empty(&event.name),
        ("source", None) => non_empty(&event.source),
        ("data_type", None) => non_empty(&event.data_type),
        ("timestamp", None) => Some(event.timestamp.to_rfc3339()),
        _ => None,
    }
}

fn quoted(expression: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|q| {
        expression
            .strip_prefix(q)
            .and_then(|e| e.strip_suffix(q))
    })
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Walk `a.b[0].c` through a JSON object.
fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let (key, indices) = split_indices(first)?;
    let mut current = index_into(root.get(key)?, &indices)?;

    for segment in segments {
        let (key, indices) = split_indices(segment)?;
        current = index_into(current.get(key)?, &indices)?;
    }
    Some(current)
}

/// `hosts[0][1]` → ("hosts", [0, 1]).
fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let key = &segment[..open];
    let indices = segment[open..]
        .split('[')
        .skip(1)
        .map(|part| part.strip_suffix(']')?.trim().parse().ok())
        .collect::<Option<Vec<usize>>>()?;
    Some((key, indices))
}

fn index_into<'a>(mut value: &'a Value, indices: &[usize]) -> Option<&'a Value> {
    for &i in indices {
        value = value.get(i)?;
    }
    Some(value)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event::new(
            "recon.new-domain",
            r#"{"domain": "example.com", "depth": 2, "hosts": [{"ip": "10.0.0.1"}], "note": null}"#,
        )
        .with_source("subfinder")
    }

    #[test]
    fn test_envelope_fields() {
        let event = sample_event();
        assert_eq!(evaluate("event.topic", &event).unwrap(), "recon.new-domain");
        assert_eq!(evaluate("event.source", &event).unwrap(), "subfinder");
        assert_eq!(evaluate("event.name", &event), None);
    }

    #[test]
    fn test_payload_paths() {
        let event = sample_event();
        assert_eq!(evaluate("event.payload.domain", &event).unwrap(), "example.com");
        assert_eq!(evaluate("event.data.depth", &event).unwrap(), "2");
        assert_eq!(evaluate("{{ event.payload.hosts[0].ip }}", &event).unwrap(), "10.0.0.1");
        assert_eq!(evaluate("event.payload.note", &event), None);
        assert_eq!(evaluate("event.payload.missing", &event), None);
    }

    #[test]
    fn test_alternatives_and_literals() {
        let event = sample_event();
        assert_eq!(
            evaluate("event.payload.url || event.payload.domain", &event).unwrap(),
            "example.com"
        );
        assert_eq!(evaluate("event.payload.url || 'fallback'", &event).unwrap(), "fallback");
        assert_eq!(evaluate("garbage", &event), None);
    }

    #[test]
    fn test_resolve_vars_skips_unresolved() {
        let trigger = Trigger::event("t", "recon.new-domain")
            .with_var("target", "event.payload.domain")
            .with_var("missing", "event.payload.nope");
        let vars = resolve_vars(&trigger, &sample_event()).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars["target"], "example.com");

        let none = Trigger::event("t", "x").with_var("a", "event.payload.nope");
        assert!(resolve_vars(&none, &sample_event()).is_none());
        assert!(resolve_vars(&Trigger::event("t", "x"), &sample_event()).is_none());
    }

    #[test]
    fn test_extract_input() {
        let raw = Event::new("recon.new-domain", "  example.com \n");
        let trigger = Trigger::event("t", "recon.new-domain").with_input_name("target");
        assert_eq!(extract_input(&trigger, &raw), "example.com");

        let mut by_field = trigger.clone();
        by_field.input.as_mut().unwrap().field = Some("domain".into());
        assert_eq!(extract_input(&by_field, &sample_event()), "example.com");

        by_field.input.as_mut().unwrap().field = Some("event.source".into());
        assert_eq!(extract_input(&by_field, &sample_event()), "subfinder");
    }
}
