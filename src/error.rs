use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    /// A provider answered with a non-success status.
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Token error: {0}")]
    Token(String),

    #[error("Invalid token response from API")]
    InvalidTokenResponse,

    #[error("SDP response error: {status} {body}")]
    Sdp { status: u16, body: String },

    #[error("Media error: {0}")]
    Media(String),

    #[error("Microphone access denied: {0}")]
    MicrophoneDenied(String),

    #[error("Data channel not ready")]
    ChannelNotOpen,

    #[error("No active session")]
    SessionInactive,

    #[error("A session is already started")]
    SessionAlreadyStarted,

    #[error("Session start was cancelled")]
    Cancelled,

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("The session controller has shut down")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
