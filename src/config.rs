use crate::client::platform::{AudioConstraints, IceServer};
use crate::protocol::models::{DEFAULT_MODEL, DEFAULT_VOICE, SessionRequest};
use crate::transport::rest::BASE_URL;
use crate::transport::search::SEARCH_BASE_URL;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DATA_CHANNEL_LABEL: &str = "oai-events";
pub const WELCOME_TEXT: &str = "Hello Jose, can you introduce yourself?";
pub const WELCOME_DELAY: Duration = Duration::from_secs(1);

/// Token service and search proxy settings. Every field can also be set from
/// the environment (a `.env` file is honoured by the binary).
#[derive(Debug, Clone, Parser)]
#[command(name = "oai-rt-voice")]
#[command(about = "Token mint and search proxy for the realtime voice assistant", long_about = None)]
pub struct ServerConfig {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Provider secret used to mint session credentials
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Search provider secret
    #[arg(long, env = "SERPAPI_KEY", hide_env_values = true)]
    pub serpapi_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "SERPAPI_BASE_URL", default_value = SEARCH_BASE_URL)]
    pub search_base_url: String,

    /// Model requested when minting a session
    #[arg(long, env = "REALTIME_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Voice requested when minting a session
    #[arg(long, env = "REALTIME_VOICE", default_value = DEFAULT_VOICE)]
    pub voice: String,

    /// Directory of client assets served for every other path
    #[arg(long, env = "STATIC_DIR", value_name = "DIR")]
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// The provider secret, treating an empty value as absent.
    #[must_use]
    pub fn provider_secret(&self) -> Option<&str> {
        non_empty(self.openai_api_key.as_deref())
    }

    /// The search secret, treating an empty value as absent.
    #[must_use]
    pub fn search_secret(&self) -> Option<&str> {
        non_empty(self.serpapi_key.as_deref())
    }

    #[must_use]
    pub fn session_request(&self) -> SessionRequest {
        SessionRequest {
            model: self.model.clone(),
            voice: self.voice.clone(),
        }
    }

    /// # Errors
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            openai_api_key: None,
            serpapi_key: None,
            openai_base_url: BASE_URL.to_string(),
            search_base_url: SEARCH_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            static_dir: None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Session controller settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root of the token/search server, e.g. `http://localhost:3000`.
    pub server_url: String,
    /// Root of the realtime REST API used for the SDP exchange.
    pub api_base_url: String,
    pub model: String,
    pub ice_servers: Vec<IceServer>,
    pub channel_label: String,
    pub audio_constraints: AudioConstraints,
    pub welcome_text: String,
    pub welcome_delay: Duration,
    /// Optional instructions sent along with the tool declaration.
    pub instructions: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{DEFAULT_PORT}"),
            api_base_url: BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            ice_servers: vec![
                IceServer::new("stun:stun.l.google.com:19302"),
                IceServer::new("stun:stun1.l.google.com:19302"),
            ],
            channel_label: DATA_CHANNEL_LABEL.to_string(),
            audio_constraints: AudioConstraints::default(),
            welcome_text: WELCOME_TEXT.to_string(),
            welcome_delay: WELCOME_DELAY,
            instructions: None,
        }
    }
}
