//! Token service and search proxy.
//!
//! Both routes are stateless passthroughs; a missing secret degrades the
//! matching route to an error response instead of failing start-up.

mod error;
mod routes;

pub use error::ApiError;
pub use routes::{search, token, SearchParams};

use crate::config::ServerConfig;
use crate::protocol::models::SessionRequest;
use crate::transport::rest::{http_client, RealtimeRestAdapter};
use crate::transport::search::SearchApiAdapter;
use crate::Result;
use axum::Router;
use axum::routing::get;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone, Debug)]
pub struct AppState {
    pub(crate) realtime: Option<Arc<RealtimeRestAdapter>>,
    pub(crate) search: Option<Arc<SearchApiAdapter>>,
    pub(crate) session: Arc<SessionRequest>,
    static_dir: Option<PathBuf>,
}

impl AppState {
    /// Build the shared state, creating an adapter only for secrets that are set.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or the provider
    /// secret is not a valid header value.
    #[allow(clippy::result_large_err)]
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = http_client()?;

        let realtime = match config.provider_secret() {
            Some(key) => Some(Arc::new(RealtimeRestAdapter::with_client(
                client.clone(),
                key,
                config.openai_base_url.clone(),
            )?)),
            None => {
                tracing::warn!("OPENAI_API_KEY is not set; /token will answer with an error");
                None
            }
        };

        let search = if let Some(key) = config.search_secret() {
            Some(Arc::new(SearchApiAdapter::new(client, key, config.search_base_url.clone())))
        } else {
            tracing::warn!("SERPAPI_KEY is not set; /search will answer with an error");
            None
        };

        Ok(Self {
            realtime,
            search,
            session: Arc::new(config.session_request()),
            static_dir: config.static_dir.clone(),
        })
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    let static_dir = state.static_dir.clone();
    let router = Router::new()
        .route("/token", get(token))
        .route("/search", get(search))
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}
