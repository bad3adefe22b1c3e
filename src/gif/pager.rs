//! Search and pagination state for the GIF picker

use std::sync::Arc;

use super::{GifProvider, GifResult};
use crate::backend::Directory;
use crate::models::{ContentFilter, Gif};

/// Accumulated GIF results for the current query.
///
/// A blank query shows the trending set, which has a single page. A search
/// appends page N+1 on `load_more` until a page comes back empty or fails;
/// after that `load_more` is a no-op until the next `submit`.
pub struct GifPager {
    provider: Arc<dyn GifProvider>,
    directory: Arc<dyn Directory>,
    viewer: String,
    /// `None` while showing trending.
    query: Option<String>,
    page: u32,
    results: Vec<Gif>,
    can_load_more: bool,
}

impl GifPager {
    pub fn new(provider: Arc<dyn GifProvider>, directory: Arc<dyn Directory>, viewer: &str) -> Self {
        Self {
            provider,
            directory,
            viewer: viewer.to_string(),
            query: None,
            page: 0,
            results: Vec::new(),
            can_load_more: false,
        }
    }

    pub fn results(&self) -> &[Gif] {
        &self.results
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn can_load_more(&self) -> bool {
        self.can_load_more
    }

    /// The viewer's saved preference, read fresh on every request.
    async fn content_filter(&self) -> ContentFilter {
        match self.directory.get_user(&self.viewer).await {
            Ok(Some(user)) => user.content_filter,
            Ok(None) => ContentFilter::default(),
            Err(e) => {
                tracing::warn!("Could not read content filter, using off: {}", e);
                ContentFilter::default()
            }
        }
    }

    /// Start over with `query`. On error the results are cleared.
    pub async fn submit(&mut self, query: &str) -> GifResult<usize> {
        let query = query.trim();
        self.query = (!query.is_empty()).then(|| query.to_string());
        self.page = 1;
        self.can_load_more = false;

        let filter = self.content_filter().await;
        let fetched = match self.query {
            Some(ref q) => self.provider.search(q, filter, 1).await,
            None => self.provider.trending(filter).await,
        };

        match fetched {
            Ok(gifs) => {
                self.can_load_more = self.query.is_some() && !gifs.is_empty();
                self.results = gifs;
                Ok(self.results.len())
            }
            Err(e) => {
                tracing::warn!("GIF search failed: {}", e);
                self.results.clear();
                Err(e)
            }
        }
    }

    /// Append the next page. Returns how many GIFs were added.
    pub async fn load_more(&mut self) -> GifResult<usize> {
        let query = match (self.can_load_more, self.query.clone()) {
            (true, Some(q)) => q,
            _ => return Ok(0),
        };

        let next = self.page + 1;
        let filter = self.content_filter().await;
        match self.provider.search(&query, filter, next).await {
            Ok(gifs) if gifs.is_empty() => {
                tracing::debug!("No more results for {:?} after page {}", query, self.page);
                self.can_load_more = false;
                Ok(0)
            }
            Ok(gifs) => {
                self.page = next;
                let added = gifs.len();
                self.results.extend(gifs);
                Ok(added)
            }
            Err(e) => {
                tracing::warn!("Loading page {} of {:?} failed: {}", next, query, e);
                self.can_load_more = false;
                Err(e)
            }
        }
    }
}
