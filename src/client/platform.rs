//! Host media platform seam.
//!
//! The controller never touches a media stack directly. A host (browser
//! bindings, a native WebRTC stack, or a test double) implements these traits
//! and reports its asynchronous callbacks as [`PeerEvent`] messages.

use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: String,
}

impl IceServer {
    #[must_use]
    pub fn new(urls: impl Into<String>) -> Self {
        Self { urls: urls.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Callbacks from the peer connection and its data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    ChannelOpen,
    ChannelClosed,
    ChannelError(String),
    /// One text frame received on the data channel.
    ChannelMessage(String),
    ConnectionState(String),
    IceConnectionState(String),
    /// The remote side attached an audio stream.
    RemoteTrack { stream_id: String },
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// A captured local audio track.
pub trait AudioTrack: Send {
    fn id(&self) -> &str;
}

/// An output element playing the model's audio.
pub trait AudioOutput: Send {
    /// Route a remote stream to the speaker.
    ///
    /// # Errors
    /// Returns an error if playback cannot start.
    fn play(&mut self, stream_id: &str) -> Result<()>;

    /// Clear the source and remove the element from the page.
    ///
    /// # Errors
    /// Returns an error if the element cannot be detached.
    fn detach(&mut self) -> Result<()>;
}

pub trait DataChannel: Send {
    /// # Errors
    /// Returns an error if the frame cannot be queued.
    fn send(&mut self, text: &str) -> Result<()>;

    /// # Errors
    /// Returns an error if the channel refuses to close.
    fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnection: Send {
    /// # Errors
    /// Returns an error if the track cannot be attached.
    fn add_track(&mut self, track: Box<dyn AudioTrack>) -> Result<()>;

    /// # Errors
    /// Returns an error if the channel cannot be created.
    fn create_data_channel(&mut self, label: &str) -> Result<Box<dyn DataChannel>>;

    /// Create an offer that also receives audio, apply it as the local
    /// description and return its SDP.
    ///
    /// # Errors
    /// Returns an error if the offer cannot be created or applied.
    async fn create_offer(&mut self) -> Result<String>;

    /// # Errors
    /// Returns an error if the answer is rejected.
    async fn set_remote_answer(&mut self, sdp: &str) -> Result<()>;

    /// Stop every local track attached to this connection.
    ///
    /// # Errors
    /// Returns an error if a track cannot be stopped.
    fn stop_tracks(&mut self) -> Result<()>;

    /// # Errors
    /// Returns an error if the connection refuses to close.
    fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Create a peer connection that reports its callbacks on `events`.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be created.
    async fn create_peer(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerConnection>>;

    /// Create and attach a fresh audio output element.
    ///
    /// # Errors
    /// Returns an error if the element cannot be created.
    fn create_audio_output(&self) -> Result<Box<dyn AudioOutput>>;

    /// Ask for microphone access.
    ///
    /// # Errors
    /// Returns `Error::MicrophoneDenied` when access is refused.
    async fn open_microphone(&self, constraints: &AudioConstraints) -> Result<Box<dyn AudioTrack>>;
}

/// Blocking user-facing alerts.
pub trait Notifier: Send + Sync {
    fn alert(&self, message: &str);
}

/// Notifier for headless hosts: alerts go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, message: &str) {
        tracing::error!(alert = message, "Session alert");
    }
}
