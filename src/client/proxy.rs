use crate::{Error, Result};
use reqwest::Client;
use serde_json::Value;
use url::Url;

/// HTTP client for the token service and search proxy.
#[derive(Clone, Debug)]
pub struct ProxyClient {
    client: Client,
    base_url: String,
}

impl ProxyClient {
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch an ephemeral credential.
    ///
    /// # Errors
    /// Returns `Error::Token` when the service reports an error and
    /// `Error::InvalidTokenResponse` when the credential is missing.
    pub async fn fetch_token(&self) -> Result<String> {
        let res = self.client.get(format!("{}/token", self.base_url)).send().await?;
        let body: Value = res.json().await?;
        credential(&body)
    }

    /// Run a search through the proxy and return its JSON body.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn search(&self, query: &str) -> Result<Value> {
        let mut url = Url::parse(&format!("{}/search", self.base_url))?;
        url.query_pairs_mut().append_pair("q", query);
        Ok(self.client.get(url).send().await?.json().await?)
    }
}

/// Pull the ephemeral credential out of a `/token` body.
#[allow(clippy::result_large_err)]
fn credential(body: &Value) -> Result<String> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = error.as_str().map_or_else(|| error.to_string(), str::to_owned);
        return Err(Error::Token(message));
    }
    match body.pointer("/client_secret/value").and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_owned()),
        _ => Err(Error::InvalidTokenResponse),
    }
}
