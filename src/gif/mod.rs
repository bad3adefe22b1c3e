//! GIF search gateway
//!
//! Two ways to reach the Klipy provider: directly with a key from the local
//! configuration (`klipy`), or through the relay service that keeps the key
//! server-side (`relay`, served by `server`). `pager` drives search and
//! pagination on top of either.

pub mod klipy;
pub mod pager;
pub mod relay;
pub mod server;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{GifMode, GifSettings};
use crate::models::{ContentFilter, Gif};

pub const KLIPY_BASE: &str = "https://api.klipy.com/api/v1";
pub const PER_PAGE: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum GifError {
    #[error("GIF search is not configured: {0}")]
    NotConfigured(String),
    #[error("GIF provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("GIF provider error: {0}")]
    Provider(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Unexpected GIF provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type GifResult<T> = Result<T, GifError>;

/// Source of GIF pages.
#[async_trait]
pub trait GifProvider: Send + Sync {
    /// The provider's default set. Not paginated.
    async fn trending(&self, filter: ContentFilter) -> GifResult<Vec<Gif>>;
    /// Page `page` (1-based) of results for `query`.
    async fn search(&self, query: &str, filter: ContentFilter, page: u32) -> GifResult<Vec<Gif>>;
}

/// Build the provider selected in the configuration.
pub fn provider_from_settings(settings: &GifSettings, customer_id: &str) -> GifResult<Arc<dyn GifProvider>> {
    match settings.mode {
        GifMode::Relay => {
            let url = settings
                .relay_url
                .as_deref()
                .ok_or_else(|| GifError::NotConfigured("relay_url is not set".into()))?;
            Ok(Arc::new(relay::RelayClient::new(url)))
        }
        GifMode::Direct => {
            let key = settings
                .klipy_api_key
                .as_deref()
                .ok_or_else(|| GifError::NotConfigured("klipy_api_key is not set".into()))?;
            tracing::warn!("Calling the GIF provider directly; the API key is stored on this machine");
            Ok(Arc::new(klipy::KlipyClient::new(&settings.klipy_base, key, Some(customer_id))))
        }
    }
}

// ---------------------------------------------------------------------------
// Provider response
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct KlipyResponse {
    #[serde(default)]
    result: bool,
    data: Option<KlipyPage>,
    /// Set by the relay when the provider call failed.
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KlipyPage {
    #[serde(default)]
    data: Vec<KlipyItem>,
}

#[derive(Debug, Deserialize)]
struct KlipyItem {
    id: serde_json::Value,
    title: Option<String>,
    #[serde(default)]
    file: KlipyFiles,
}

#[derive(Debug, Default, Deserialize)]
struct KlipyFiles {
    sm: Option<KlipyRendition>,
    md: Option<KlipyRendition>,
}

#[derive(Debug, Deserialize)]
struct KlipyRendition {
    gif: Option<KlipyAsset>,
}

#[derive(Debug, Deserialize)]
struct KlipyAsset {
    url: String,
}

impl KlipyRendition {
    fn gif_url(&self) -> Option<&str> {
        self.gif.as_ref().map(|g| g.url.as_str()).filter(|u| !u.is_empty())
    }
}

impl KlipyItem {
    fn into_gif(self) -> Option<Gif> {
        let url = self.file.md.as_ref()?.gif_url()?.to_string();
        let thumbnail_url = self
            .file
            .sm
            .as_ref()
            .and_then(KlipyRendition::gif_url)
            .map(String::from)
            .unwrap_or_else(|| url.clone());
        let id = match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Some(Gif {
            id,
            title: self.title.filter(|t| !t.is_empty()),
            thumbnail_url,
            url,
        })
    }
}

/// Parse a provider (or relayed) response body into GIFs.
///
/// Items without a medium GIF rendition are skipped.
pub fn parse_page(body: &str) -> GifResult<Vec<Gif>> {
    let resp: KlipyResponse = serde_json::from_str(body)?;
    if let Some(msg) = resp.error {
        return Err(GifError::Provider(msg));
    }
    if !resp.result {
        return Err(GifError::Provider("request was not successful".into()));
    }
    let page = resp
        .data
        .ok_or_else(|| GifError::Provider("response has no data".into()))?;

    let total = page.data.len();
    let gifs: Vec<Gif> = page.data.into_iter().filter_map(KlipyItem::into_gif).collect();
    if gifs.len() < total {
        tracing::debug!("Skipped {} GIFs without a usable rendition", total - gifs.len());
    }
    Ok(gifs)
}

/// Turn a non-2xx response into `GifError::Http`, preferring a relay `{error}` message.
async fn check_response(resp: reqwest::Response) -> GifResult<String> {
    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    if let Ok(KlipyResponse { error: Some(msg), .. }) = serde_json::from_str::<KlipyResponse>(&body) {
        return Err(GifError::Provider(msg));
    }
    Err(GifError::Http {
        status: status.as_u16(),
        body,
    })
}
