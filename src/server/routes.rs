use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use super::AppState;
use super::error::ApiError;
use crate::error::Error;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

/// `GET /token`: mint a short-lived session credential.
pub async fn token(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let Some(rest) = state.realtime.as_ref() else {
        error!("No API key provided");
        return Err(ApiError::internal("No API key configured"));
    };

    match rest.create_session(&state.session).await {
        Ok(body) => {
            debug!(model = %state.session.model, "Minted realtime session");
            Ok(Json(body))
        }
        Err(Error::Upstream { status, message }) => {
            error!(status, %message, "Realtime API error");
            Err(ApiError::upstream(status, message))
        }
        Err(err) => {
            error!("Token generation error: {err}");
            Err(ApiError::internal("Failed to generate token"))
        }
    }
}

/// `GET /search?q=`: forward a query to the search provider.
pub async fn search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let query = match params {
        Ok(Query(SearchParams { q: Some(q) })) if !q.is_empty() => q,
        Ok(_) => return Err(ApiError::bad_request("Search query is required")),
        Err(rejection) => {
            debug!("Unreadable search query string: {rejection}");
            return Err(ApiError::bad_request("Search query is required"));
        }
    };

    let Some(search) = state.search.as_ref() else {
        error!("No search API key provided");
        return Err(ApiError::internal("No search API key configured"));
    };

    match search.search(&query).await {
        Ok(body) => {
            debug!(%query, "Search proxied");
            Ok(Json(body))
        }
        Err(err) => {
            error!("Search error: {err}");
            Err(ApiError::internal("Failed to perform search"))
        }
    }
}
