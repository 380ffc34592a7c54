//! Client side of the voice session.
//!
//! [`SessionController`] owns the lifecycle of one realtime connection: it
//! fetches a credential from the token service, negotiates media through a
//! host [`MediaBackend`], relays data-channel events into an [`EventLog`] and
//! lets the [`ToolPanel`] answer search tool calls through the search proxy.

mod controller;
pub mod event_log;
pub mod platform;
mod proxy;
pub mod tools;

pub use controller::{MicrophoneStatus, SessionController, SessionState};
pub use event_log::{Direction, Event, EventLog, EventStream};
pub use platform::{
    AudioConstraints, AudioOutput, AudioTrack, DataChannel, IceServer, LogNotifier, MediaBackend,
    Notifier, PeerConfig, PeerConnection, PeerEvent, PeerEventSender,
};
pub use proxy::ProxyClient;
pub use tools::{ToolPanel, ToolPanelView, SEARCH_TOOL_NAME};
