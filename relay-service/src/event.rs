//! Webhook payload normalization.
//!
//! GHL payload shapes vary between integrations, so the event type and
//! contact id are probed from several conventionally-named fields in
//! priority order. Both extractors are total: absence of a field is
//! not an error.

use serde_json::Value;

/// Event-type fields probed in priority order.
const EVENT_TYPE_FIELDS: [&str; 4] = ["event", "type", "eventType", "action"];

/// Extract the canonical event type from a webhook payload.
///
/// Probes `event`, `type`, `eventType` and `action` in that order and
/// returns the first string value found, sanitized. Falls back to
/// `"unknown"` when none is present.
pub fn extract_event_type(payload: &Value) -> String {
    for field in EVENT_TYPE_FIELDS {
        if let Some(value) = payload.get(field).and_then(Value::as_str) {
            let sanitized = sanitize_field(value);
            if !sanitized.is_empty() {
                return sanitized;
            }
        }
    }

    "unknown".to_string()
}

/// Extract the contact id from a webhook payload, if present.
///
/// Probes `contactId`, `contact.id` and `id` in that order.
pub fn extract_contact_id(payload: &Value) -> Option<String> {
    let candidates = [
        payload.get("contactId"),
        payload.get("contact").and_then(|c| c.get("id")),
        payload.get("id"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(sanitize_field)
        .find(|s| !s.is_empty())
}

/// Trim whitespace and strip control characters from a payload field.
fn sanitize_field(raw: &str) -> String {
    raw.trim().chars().filter(|c| !c.is_control()).collect()
}
