//! User-related models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// GIF content filter preference, forwarded to the GIF provider on every search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFilter {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl ContentFilter {
    pub const ALL: [ContentFilter; 4] = [
        ContentFilter::Off,
        ContentFilter::Low,
        ContentFilter::Medium,
        ContentFilter::High,
    ];

    /// Wire value used by the provider and the directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFilter::Off => "off",
            ContentFilter::Low => "low",
            ContentFilter::Medium => "medium",
            ContentFilter::High => "high",
        }
    }

    /// Short description for settings output.
    pub fn describe(&self) -> &'static str {
        match self {
            ContentFilter::Off => "All content allowed",
            ContentFilter::Low => "Minimal content filtering",
            ContentFilter::Medium => "Moderate content filtering",
            ContentFilter::High => "Strict family-friendly content only",
        }
    }
}

impl fmt::Display for ContentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentFilter {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(ContentFilter::Off),
            "low" => Ok(ContentFilter::Low),
            "medium" => Ok(ContentFilter::Medium),
            "high" => Ok(ContentFilter::High),
            other => Err(ModelError::UnknownContentFilter(other.to_string())),
        }
    }
}

/// User profile record owned by the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub content_filter: ContentFilter,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Profile record written at sign-up. Timestamps are assigned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub bio: String,
    pub content_filter: ContentFilter,
}

impl NewProfile {
    pub fn for_sign_up(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: String::new(),
            bio: String::new(),
            content_filter: ContentFilter::Off,
        }
    }
}

/// Partial profile edit. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_filter: Option<ContentFilter>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.bio.is_none()
            && self.avatar_url.is_none()
            && self.content_filter.is_none()
    }

    /// Apply this edit to a user record in place.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(ref name) = self.display_name {
            user.display_name = name.clone();
        }
        if let Some(ref bio) = self.bio {
            user.bio = bio.clone();
        }
        if let Some(ref url) = self.avatar_url {
            user.avatar_url = Some(url.clone());
        }
        if let Some(filter) = self.content_filter {
            user.content_filter = filter;
        }
    }
}
