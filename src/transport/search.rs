use reqwest::Client;
use crate::error::Result;
use serde_json::Value;
use url::Url;

pub const SEARCH_BASE_URL: &str = "https://serpapi.com";
const SEARCH_ENGINE: &str = "google";

/// An adapter for the web search provider.
#[derive(Clone, Debug)]
pub struct SearchApiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl SearchApiAdapter {
    #[must_use]
    pub fn new(client: Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Run a query and return the provider's JSON body unmodified.
    ///
    /// The provider reports its own failures inside the body, so a non-success
    /// status is not an error here as long as the body is JSON.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn search(&self, query: &str) -> Result<Value> {
        let mut url = Url::parse(&format!("{}/search", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("api_key", &self.api_key)
            .append_pair("engine", SEARCH_ENGINE);

        let res = self.client.get(url).send().await?;
        if !res.status().is_success() {
            tracing::warn!(status = res.status().as_u16(), "Search provider answered with an error status");
        }
        Ok(res.json().await?)
    }
}
