use serde::Deserialize;
use serde_json::Value;
use super::models::{ArbitraryJson, ToolCallPayload};

/// Inbound events the client reacts to. Everything else is only logged.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        session: ArbitraryJson,
    },
    #[serde(rename = "response.tool_call")]
    ResponseToolCall {
        #[serde(default)]
        event_id: Option<String>,
        tool_call: ToolCallPayload,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        error: ArbitraryJson,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Classify a raw inbound payload; shapes that do not match a known
    /// event collapse to `Unknown`.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or_else(|err| {
            tracing::debug!("Unrecognised server event shape: {err}");
            Self::Unknown
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_event_parses() {
        let value = json!({
            "type": "response.tool_call",
            "tool_call": { "id": "call_1", "name": "search_documentation", "arguments": "{\"query\":\"helm\"}" }
        });
        match ServerEvent::from_value(&value) {
            ServerEvent::ResponseToolCall { tool_call, .. } => {
                assert_eq!(tool_call.id, "call_1");
                assert_eq!(tool_call.name, "search_documentation");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_types_and_bad_shapes_collapse() {
        let unknown = json!({ "type": "response.audio.delta", "delta": "AAAA" });
        assert_eq!(ServerEvent::from_value(&unknown), ServerEvent::Unknown);

        let missing_payload = json!({ "type": "response.tool_call" });
        assert_eq!(ServerEvent::from_value(&missing_payload), ServerEvent::Unknown);
    }
}
