//! Client for the GIF relay
//!
//! The relay holds the provider key. We POST `{query, contentFilter, page}`
//! and get the provider's body back verbatim, or `{error}` with status 500.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_response, parse_page, GifProvider, GifResult};
use crate::models::{ContentFilter, Gif};

/// Body accepted by the relay. An empty query asks for trending GIFs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub content_filter: ContentFilter,
    #[serde(default = "first_page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

pub struct RelayClient {
    http: reqwest::Client,
    url: String,
}

impl RelayClient {
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    async fn call(&self, request: &RelayRequest) -> GifResult<Vec<Gif>> {
        tracing::debug!("Relay POST {} (query={:?}, page={})", self.url, request.query, request.page);
        let resp = self.http.post(&self.url).json(request).send().await?;
        let body = check_response(resp).await?;
        parse_page(&body)
    }
}

#[async_trait]
impl GifProvider for RelayClient {
    async fn trending(&self, filter: ContentFilter) -> GifResult<Vec<Gif>> {
        self.call(&RelayRequest {
            query: String::new(),
            content_filter: filter,
            page: 1,
        })
        .await
    }

    async fn search(&self, query: &str, filter: ContentFilter, page: u32) -> GifResult<Vec<Gif>> {
        self.call(&RelayRequest {
            query: query.to_string(),
            content_filter: filter,
            page,
        })
        .await
    }
}
