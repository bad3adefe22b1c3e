//! Direct Klipy client
//!
//! The API key travels in the URL path, so whoever holds this configuration
//! holds the key. Prefer the relay where one is deployed.

use async_trait::async_trait;

use super::{check_response, parse_page, GifProvider, GifResult, PER_PAGE};
use crate::models::{ContentFilter, Gif};

pub struct KlipyClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    customer_id: Option<String>,
}

impl KlipyClient {
    pub fn new(base: &str, api_key: &str, customer_id: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            customer_id: customer_id.map(String::from),
        }
    }

    fn endpoint(&self, kind: &str) -> String {
        format!("{}/{}/gifs/{}", self.base, self.api_key, kind)
    }

    fn search_params(&self, query: &str, filter: ContentFilter, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![("q", query.to_string())];
        if let Some(ref customer) = self.customer_id {
            params.push(("customer_id", customer.clone()));
        }
        params.push(("content_filter", filter.as_str().to_string()));
        params.push(("per_page", PER_PAGE.to_string()));
        params.push(("page", page.to_string()));
        params
    }

    async fn fetch(&self, url: &str, params: &[(&str, String)]) -> GifResult<Vec<Gif>> {
        // The key is part of the path; keep it out of the logs.
        tracing::debug!("Klipy GET {}", url.replace(&self.api_key, "***"));
        let resp = self.http.get(url).query(params).send().await?;
        let body = check_response(resp).await?;
        parse_page(&body)
    }
}

#[async_trait]
impl GifProvider for KlipyClient {
    async fn trending(&self, filter: ContentFilter) -> GifResult<Vec<Gif>> {
        let params = [
            ("per_page", PER_PAGE.to_string()),
            ("content_filter", filter.as_str().to_string()),
        ];
        self.fetch(&self.endpoint("trending"), &params).await
    }

    async fn search(&self, query: &str, filter: ContentFilter, page: u32) -> GifResult<Vec<Gif>> {
        let params = self.search_params(query, filter, page);
        self.fetch(&self.endpoint("search"), &params).await
    }
}
