//! GIF relay service
//!
//! Accepts `{query, contentFilter, page}` from a JSON body or the query
//! string, calls Klipy with the key from `KLIPY_API_KEY`, and returns the
//! provider's body verbatim. Failures come back as `{"error": msg}`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use super::{KLIPY_BASE, PER_PAGE};
use crate::models::ContentFilter;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub klipy_base: String,
    pub bind: SocketAddr,
}

impl RelayConfig {
    /// Read `KLIPY_API_KEY` (and optionally `KLIPY_BASE`) from the environment or `.env`.
    pub fn from_env(bind: SocketAddr) -> Result<Self> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("KLIPY_API_KEY").context("KLIPY_API_KEY must be set")?;
        let klipy_base = std::env::var("KLIPY_BASE").unwrap_or_else(|_| KLIPY_BASE.to_string());
        Ok(Self {
            api_key,
            klipy_base,
            bind,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Upstream(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(ref msg) => {
                tracing::error!("Error fetching GIFs: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Upstream(e.to_string())
    }
}

/// Fields as they arrive. Every one is optional in both places.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParams {
    query: Option<String>,
    content_filter: Option<String>,
    page: Option<serde_json::Value>,
}

#[derive(Debug, PartialEq)]
struct RelayParams {
    query: String,
    content_filter: ContentFilter,
    page: u32,
}

/// Body wins over query string, field by field; blanks fall through.
fn merge_params(body: RawParams, query: RawParams) -> Result<RelayParams, RelayError> {
    let text = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    let search = text(body.query).or_else(|| text(query.query)).unwrap_or_default();
    let content_filter = match text(body.content_filter).or_else(|| text(query.content_filter)) {
        Some(raw) => raw
            .parse::<ContentFilter>()
            .map_err(|e| RelayError::BadRequest(e.to_string()))?,
        None => ContentFilter::Off,
    };
    let page = match body.page.or(query.page) {
        None | Some(serde_json::Value::Null) => 1,
        Some(raw) => page_number(&raw)
            .ok_or_else(|| RelayError::BadRequest(format!("invalid page {}", raw)))?,
    };

    Ok(RelayParams {
        query: search.trim().to_string(),
        content_filter,
        page,
    })
}

fn page_number(raw: &serde_json::Value) -> Option<u32> {
    let n = match raw {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (n >= 1).then_some(n)
}

struct RelayState {
    http: reqwest::Client,
    api_key: String,
    klipy_base: String,
}

impl RelayState {
    fn upstream(&self, params: &RelayParams) -> reqwest::RequestBuilder {
        let base = self.klipy_base.trim_end_matches('/');
        if params.query.is_empty() {
            self.http
                .get(format!("{}/{}/gifs/trending", base, self.api_key))
                .query(&[("per_page", PER_PAGE.to_string())])
        } else {
            self.http
                .get(format!("{}/{}/gifs/search", base, self.api_key))
                .query(&[
                    ("q", params.query.clone()),
                    ("content_filter", params.content_filter.as_str().to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", params.page.to_string()),
                ])
        }
    }
}

async fn relay(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<RawParams>,
    body: Bytes,
) -> Result<Response, RelayError> {
    let body: RawParams = if body.is_empty() {
        RawParams::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| RelayError::BadRequest(format!("invalid JSON body: {}", e)))?
    };
    let params = merge_params(body, query)?;

    let resp = state.upstream(&params).send().await?;
    let status = resp.status();
    let text = resp.text().await?;
    if serde_json::from_str::<serde_json::Value>(&text).is_err() {
        return Err(RelayError::Upstream(format!(
            "provider returned non-JSON body (HTTP {})",
            status
        )));
    }
    tracing::info!(
        "Fetched GIFs (query={:?}, filter={}, page={}, status={})",
        params.query,
        params.content_filter,
        params.page,
        status
    );

    Ok(([(header::CONTENT_TYPE, "application/json")], text).into_response())
}

pub fn router(config: &RelayConfig) -> Router {
    let state = Arc::new(RelayState {
        http: reqwest::Client::new(),
        api_key: config.api_key.clone(),
        klipy_base: config.klipy_base.clone(),
    });
    Router::new()
        .route("/", get(relay).post(relay))
        .with_state(state)
}

/// Serve the relay until the process is stopped.
pub async fn serve(config: RelayConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("GIF relay listening on {}", listener.local_addr()?);
    axum::serve(listener, router(&config)).await?;
    Ok(())
}
