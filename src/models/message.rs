//! Message-related models
//!
//! A message carries exactly one payload: the URL of a GIF. There is no text body.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Validated absolute http(s) URL of a GIF.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GifUrl(String);

impl GifUrl {
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ModelError::MissingGifUrl);
        }
        let parsed =
            url::Url::parse(raw).map_err(|e| ModelError::InvalidGifUrl(format!("{}: {}", raw, e)))?;
        match parsed.scheme() {
            "http" | "https" => Ok(Self(raw.to_string())),
            other => Err(ModelError::InvalidGifUrl(format!(
                "{}: unsupported scheme {}",
                raw, other
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GifUrl {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GifUrl::parse(&value)
    }
}

impl From<GifUrl> for String {
    fn from(url: GifUrl) -> Self {
        url.0
    }
}

impl fmt::Display for GifUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub gif_url: GifUrl,
    pub timestamp: DateTime<Utc>,
}

/// A message about to be sent. The timestamp is assigned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub room_id: String,
    pub sender_id: String,
    pub gif_url: GifUrl,
}

impl NewMessage {
    pub fn new(room_id: &str, sender_id: &str, gif_url: GifUrl) -> Self {
        Self {
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            gif_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gif_url_rejects_blank() {
        assert_eq!(GifUrl::parse("").unwrap_err(), ModelError::MissingGifUrl);
        assert_eq!(GifUrl::parse("   ").unwrap_err(), ModelError::MissingGifUrl);
    }

    #[test]
    fn test_gif_url_requires_http() {
        assert!(GifUrl::parse("https://x/g.gif").is_ok());
        assert!(GifUrl::parse("http://media.example/a.gif").is_ok());
        assert!(GifUrl::parse("ftp://x/g.gif").is_err());
        assert!(GifUrl::parse("not a url").is_err());
    }

    #[test]
    fn test_message_without_gif_url_does_not_deserialize() {
        let json = serde_json::json!({
            "id": "m1",
            "roomId": "r1",
            "senderId": "u1",
            "gifUrl": "",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        assert!(serde_json::from_value::<Message>(json).is_err());
    }
}
