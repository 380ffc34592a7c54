use crate::{Error, Result};
use futures::Stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the model.
    Inbound,
    /// Sent by this client.
    Outbound,
}

/// One protocol event as it crossed the data channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    direction: Direction,
    payload: Arc<Value>,
}

impl Event {
    /// Parse a received data-channel frame.
    ///
    /// # Errors
    /// Returns an error unless the frame is a JSON object with a string `type`.
    #[allow(clippy::result_large_err)]
    pub fn inbound(text: &str) -> Result<Self> {
        let payload: Value = serde_json::from_str(text)?;
        ensure_event_shape(&payload)?;
        Ok(Self { direction: Direction::Inbound, payload: Arc::new(payload) })
    }

    pub(crate) fn outbound(payload: Value) -> Self {
        Self { direction: Direction::Outbound, payload: Arc::new(payload) }
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The event's `type` field.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.payload.get("type").and_then(Value::as_str).unwrap_or_default()
    }

    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        self.payload.get("event_id").and_then(Value::as_str)
    }
}

#[allow(clippy::result_large_err)]
pub(crate) fn ensure_event_shape(payload: &Value) -> Result<()> {
    let Some(object) = payload.as_object() else {
        return Err(Error::InvalidEvent("event is not a JSON object".to_string()));
    };
    match object.get("type") {
        Some(Value::String(_)) => Ok(()),
        _ => Err(Error::InvalidEvent("event has no string `type`".to_string())),
    }
}

/// Give an outbound event a fresh `event_id` unless it already carries one.
#[allow(clippy::result_large_err)]
pub(crate) fn stamp_event_id(payload: &mut Value) -> Result<()> {
    ensure_event_shape(payload)?;
    let Some(object) = payload.as_object_mut() else {
        return Err(Error::InvalidEvent("event is not a JSON object".to_string()));
    };
    let has_id = object
        .get("event_id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        object.insert(
            "event_id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    Ok(())
}

/// Append-only event history, newest first.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: VecDeque<Event>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.entries.push_front(event);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Live feed of events as they are logged, oldest first.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    #[must_use]
    pub const fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx }
    }

    /// Await the next logged event; `None` once the controller is gone.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}
