use reqwest::{Client, header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE}};
use crate::protocol::models::SessionRequest;
use crate::error::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Build the HTTP client shared by every adapter in a process.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialised.
#[allow(clippy::result_large_err)]
pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
        .build()?)
}

/// An adapter for the `OpenAI` Realtime REST API.
///
/// The same adapter serves both sides of the handshake: the server holds one
/// built from the long-lived provider secret to mint sessions, the client
/// builds one per session from the ephemeral credential to exchange SDP.
#[derive(Clone, Debug)]
pub struct RealtimeRestAdapter {
    client: Client,
    auth_header: HeaderValue,
    base_url: String,
}

impl RealtimeRestAdapter {
    /// Build an adapter over an existing HTTP client.
    ///
    /// # Errors
    /// Returns an error if the key results in an invalid header.
    #[allow(clippy::result_large_err)]
    pub fn with_client(client: Client, bearer: &str, base_url: impl Into<String>) -> Result<Self> {
        let mut auth_header = HeaderValue::from_str(&format!("Bearer {bearer}"))?;
        auth_header.set_sensitive(true);
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            auth_header,
            base_url,
        })
    }

    /// Mint a realtime session and return the provider's body verbatim.
    ///
    /// # Errors
    /// Returns `Error::Upstream` carrying the provider status and its
    /// `error.message` (or a generic message) on a non-success answer, and a
    /// transport or decode error otherwise.
    pub async fn create_session(&self, request: &SessionRequest) -> Result<Value> {
        let res = self.client
            .post(format!("{}/realtime/sessions", self.base_url))
            .header(AUTHORIZATION, &self.auth_header)
            .json(request)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.json::<Value>().await.unwrap_or_default();
            let message = upstream_error_message(&body)
                .unwrap_or_else(|| format!("API error: {}", status.as_u16()));
            return Err(Error::Upstream { status: status.as_u16(), message });
        }

        Ok(res.json().await?)
    }

    /// Post an SDP offer and return the SDP answer text.
    ///
    /// # Errors
    /// Returns `Error::Sdp` with the status and body on a non-success answer.
    pub async fn post_sdp_offer(&self, model: &str, sdp_offer: String) -> Result<String> {
        let mut url = Url::parse(&format!("{}/realtime", self.base_url))?;
        url.query_pairs_mut().append_pair("model", model);

        let res = self.client
            .post(url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "application/sdp")
            .body(sdp_offer)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(Error::Sdp { status: status.as_u16(), body });
        }
        Ok(body)
    }
}

fn upstream_error_message(body: &Value) -> Option<String> {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
