//! JSON-lines framing for the stdin/stdout host.
//!
//! Each input line is an invoke request, optionally tagged with an `id`
//! that is echoed back. Output lines are either
//! `{"type":"response","id":..,"response":{ok, data | error}}` or
//! `{"type":"event","event":..,"payload":..}`.

use fx_core::Runtime;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
}

/// Runs one request line. Blank lines produce no output.
pub async fn handle_line(runtime: &Runtime, line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let envelope = serde_json::from_str::<Envelope>(line).unwrap_or_default();
    let response = runtime.invoke_json(line).await;
    let response = serde_json::from_str::<Value>(&response).unwrap_or(Value::String(response));

    Some(
        json!({
            "type": "response",
            "id": envelope.id,
            "response": response,
        })
        .to_string(),
    )
}

/// Frames a runtime event (`{"event", "payload"}`) as an output line.
pub fn event_line(event: &Value) -> String {
    json!({
        "type": "event",
        "event": event.get("event").cloned().unwrap_or(Value::Null),
        "payload": event.get("payload").cloned().unwrap_or(Value::Null),
    })
    .to_string()
}
