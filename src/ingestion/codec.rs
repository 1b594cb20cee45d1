//! Event envelope codec.
//!
//! An envelope is a JSON object:
//!
//! ```json
//! {"kind": "issue_opened", "natural_key": "DB-17",
//!  "occurred_at": "2024-05-01T10:00:00Z", "payload": {"title": "DB timeout"}}
//! ```
//!
//! Decoding is strict structured parsing; every rejection names the field.

use crate::error::{AppError, Result};
use crate::models::{Event, EventBody, EventKind};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::str::FromStr;

static MISSING_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"missing field `([^`]+)`").expect("valid regex"));

/// Decode raw bytes into a typed event
pub fn decode(bytes: &[u8]) -> Result<Event> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| AppError::schema("envelope", format!("invalid JSON: {}", e)))?;
    decode_value(value)
}

/// Decode an already-parsed JSON value into a typed event
pub fn decode_value(value: Value) -> Result<Event> {
    let mut envelope = match value {
        Value::Object(map) => map,
        other => {
            return Err(AppError::schema(
                "envelope",
                format!("expected a JSON object, got {}", type_name(&other)),
            ))
        }
    };

    let kind_name = required_str(&envelope, "kind")?;
    let kind = EventKind::from_str(kind_name)
        .map_err(|_| AppError::schema("kind", format!("unknown event kind '{}'", kind_name)))?;

    let natural_key = required_str(&envelope, "natural_key")?.trim().to_string();
    if natural_key.is_empty() {
        return Err(AppError::schema("natural_key", "must not be empty"));
    }

    let occurred_at = required_str(&envelope, "occurred_at")?;
    let occurred_at = DateTime::parse_from_rfc3339(occurred_at)
        .map_err(|e| AppError::schema("occurred_at", format!("not an RFC 3339 timestamp: {}", e)))?
        .with_timezone(&Utc);

    let payload = match envelope.remove("payload") {
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(AppError::schema(
                "payload",
                format!("expected an object, got {}", type_name(&other)),
            ))
        }
        None => return Err(AppError::schema("payload", "missing")),
    };

    let body = decode_body(kind, payload)?;

    Ok(Event {
        natural_key,
        occurred_at,
        body,
    })
}

/// Canonical envelope bytes for an event
pub fn encode(event: &Event) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&encode_value(event)?)?)
}

pub fn encode_value(event: &Event) -> Result<Value> {
    let mut envelope = match serde_json::to_value(&event.body)? {
        Value::Object(map) => map,
        _ => return Err(AppError::Internal("event body did not serialize to an object".into())),
    };
    envelope.insert("natural_key".into(), Value::String(event.natural_key.clone()));
    envelope.insert(
        "occurred_at".into(),
        Value::String(event.occurred_at.to_rfc3339()),
    );
    Ok(Value::Object(envelope))
}

fn decode_body(kind: EventKind, payload: Map<String, Value>) -> Result<EventBody> {
    let payload = Value::Object(payload);
    Ok(match kind {
        EventKind::Commit => EventBody::Commit(typed(payload)?),
        EventKind::ServiceHealth => EventBody::ServiceHealth(typed(payload)?),
        EventKind::IssueOpened => EventBody::IssueOpened(typed(payload)?),
        EventKind::IssueResolved => EventBody::IssueResolved(typed(payload)?),
        EventKind::DocumentPublished => EventBody::DocumentPublished(typed(payload)?),
        EventKind::RunbookPublished => EventBody::RunbookPublished(typed(payload)?),
        EventKind::TaskCreated => EventBody::TaskCreated(typed(payload)?),
    })
}

/// Deserialize a payload, naming the offending field on failure
fn typed<T: DeserializeOwned>(payload: Value) -> Result<T> {
    serde_path_to_error::deserialize(payload).map_err(|e| {
        let path = e.path().to_string();
        let inner = e.into_inner();
        let message = inner.to_string();

        let mut field = String::from("payload");
        if path != "." {
            field.push('.');
            field.push_str(&path);
        }
        // Missing fields are reported at their parent
        if let Some(missing) = MISSING_FIELD.captures(&message).and_then(|c| c.get(1)) {
            field.push('.');
            field.push_str(missing.as_str());
        }
        AppError::schema(field, message)
    })
}

fn required_str<'a>(envelope: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    match envelope.get(field) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(AppError::schema(
            field,
            format!("expected a string, got {}", type_name(other)),
        )),
        None => Err(AppError::schema(field, "missing")),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssueOpenedPayload, RunbookPayload, RunbookStep};
    use serde_json::json;

    fn schema_field(err: AppError) -> String {
        match err {
            AppError::Schema { field, .. } => field,
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_issue_opened() {
        let raw = json!({
            "kind": "issue_opened",
            "natural_key": "DB-17",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {"title": "DB timeout", "component": "payments", "extra": 1}
        });
        let event = decode(raw.to_string().as_bytes()).unwrap();

        assert_eq!(event.kind(), EventKind::IssueOpened);
        assert_eq!(event.natural_key, "DB-17");
        match event.body {
            EventBody::IssueOpened(p) => {
                assert_eq!(p.title, "DB timeout");
                assert_eq!(p.component.as_deref(), Some("payments"));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let raw = json!({
            "kind": "drop_tables",
            "natural_key": "x",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {}
        });
        let err = decode(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(schema_field(err), "kind");
    }

    #[test]
    fn test_rejects_missing_required_payload_field() {
        let raw = json!({
            "kind": "document_published",
            "natural_key": "docs/db.md",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {"content": "no title"}
        });
        let err = decode(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(schema_field(err), "payload.title");
    }

    #[test]
    fn test_rejects_bad_envelope_fields() {
        let cases = [
            (json!([1, 2]), "envelope"),
            (
                json!({"kind": 3, "natural_key": "a", "occurred_at": "2024-05-01T10:00:00Z", "payload": {}}),
                "kind",
            ),
            (
                json!({"kind": "commit", "natural_key": "  ", "occurred_at": "2024-05-01T10:00:00Z", "payload": {}}),
                "natural_key",
            ),
            (
                json!({"kind": "commit", "natural_key": "abc", "occurred_at": "yesterday", "payload": {}}),
                "occurred_at",
            ),
            (
                json!({"kind": "commit", "natural_key": "abc", "occurred_at": "2024-05-01T10:00:00Z", "payload": "x"}),
                "payload",
            ),
            (
                json!({"kind": "commit", "natural_key": "abc", "occurred_at": "2024-05-01T10:00:00Z"}),
                "payload",
            ),
        ];

        for (raw, field) in cases {
            let err = decode(raw.to_string().as_bytes()).unwrap_err();
            assert_eq!(schema_field(err), field, "envelope {}", raw);
        }

        assert_eq!(schema_field(decode(b"{not json").unwrap_err()), "envelope");
    }

    #[test]
    fn test_wrong_payload_type_names_the_field() {
        let raw = json!({
            "kind": "service_health",
            "natural_key": "api",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {"dependencies": "db"}
        });
        let err = decode(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(schema_field(err), "payload.dependencies");

        let raw = json!({
            "kind": "runbook_published",
            "natural_key": "restart-db",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {"title": "Restart DB", "steps": [{"title": "drain"}, {"title": 7}]}
        });
        let err = decode(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(schema_field(err), "payload.steps[1].title");

        let raw = json!({
            "kind": "runbook_published",
            "natural_key": "restart-db",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {"title": "Restart DB", "steps": [{"description": "no title"}]}
        });
        let err = decode(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(schema_field(err), "payload.steps[0].title");
    }

    #[test]
    fn test_null_optional_fields_take_defaults() {
        let raw = json!({
            "kind": "issue_opened",
            "natural_key": "DB-17",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {"title": "DB timeout", "labels": null, "services": null, "body": null}
        });
        match decode(raw.to_string().as_bytes()).unwrap().body {
            EventBody::IssueOpened(p) => {
                assert!(p.labels.is_empty());
                assert!(p.services.is_empty());
                assert!(p.body.is_none());
            }
            other => panic!("unexpected body {:?}", other),
        }

        let raw = json!({
            "kind": "runbook_published",
            "natural_key": "restart-db",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {"title": "Restart DB", "steps": null, "requires": null, "services": null}
        });
        match decode(raw.to_string().as_bytes()).unwrap().body {
            EventBody::RunbookPublished(p) => {
                assert!(p.steps.is_empty());
                assert!(p.requires.is_empty());
            }
            other => panic!("unexpected body {:?}", other),
        }

        // A required field may not be null
        let raw = json!({
            "kind": "issue_opened",
            "natural_key": "DB-17",
            "occurred_at": "2024-05-01T10:00:00Z",
            "payload": {"title": null}
        });
        let err = decode(raw.to_string().as_bytes()).unwrap_err();
        assert_eq!(schema_field(err), "payload.title");
    }

    #[test]
    fn test_encode_produces_decodable_envelope() {
        let event = Event::new(
            "restart-db",
            "2024-05-01T10:00:00Z".parse().unwrap(),
            EventBody::RunbookPublished(RunbookPayload {
                title: "Restart DB".into(),
                steps: vec![RunbookStep {
                    title: "drain".into(),
                    description: None,
                }],
                ..Default::default()
            }),
        );

        let value = encode_value(&event).unwrap();
        assert_eq!(value["kind"], json!("runbook_published"));
        assert_eq!(value["natural_key"], json!("restart-db"));
        assert_eq!(value["payload"]["title"], json!("Restart DB"));

        let decoded = decode(&encode(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);

        let issue = Event::new(
            "X-1",
            Utc::now(),
            EventBody::IssueOpened(IssueOpenedPayload {
                title: "t".into(),
                ..Default::default()
            }),
        );
        assert_eq!(decode(&encode(&issue).unwrap()).unwrap().natural_key, "X-1");
    }
}
