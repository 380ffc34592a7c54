use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::models::{Item, SessionUpdate, ToolOutput};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: Box<SessionUpdate>,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: Box<Item>,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    #[serde(rename = "tool_call.response")]
    ToolCallResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        tool_call_id: String,
        /// JSON-encoded tool output.
        content: String,
    },
}

impl ClientEvent {
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            event_id: None,
            previous_item_id: None,
            item: Box::new(Item::user_text(text)),
        }
    }

    #[must_use]
    pub const fn response_create() -> Self {
        Self::ResponseCreate { event_id: None, response: None }
    }

    #[must_use]
    pub fn session_update(update: SessionUpdate) -> Self {
        Self::SessionUpdate { event_id: None, session: Box::new(update) }
    }

    /// # Errors
    /// Returns an error if the output cannot be encoded.
    pub fn tool_call_response(
        tool_call_id: impl Into<String>,
        output: &ToolOutput,
    ) -> serde_json::Result<Self> {
        Ok(Self::ToolCallResponse {
            event_id: None,
            tool_call_id: tool_call_id.into(),
            content: serde_json::to_string(output)?,
        })
    }

    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::SessionUpdate { event_id, .. }
            | Self::ConversationItemCreate { event_id, .. }
            | Self::ResponseCreate { event_id, .. }
            | Self::ToolCallResponse { event_id, .. } => event_id.as_deref(),
        }
    }
}
