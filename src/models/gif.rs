//! GIF search result model

use serde::{Deserialize, Serialize};

/// One GIF from a search or trending page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gif {
    pub id: String,
    pub title: Option<String>,
    /// Small rendition for previews.
    pub thumbnail_url: String,
    /// Rendition sent as message content.
    pub url: String,
}
