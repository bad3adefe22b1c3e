//! Backend capability interface
//!
//! Screens and feeds depend only on these traits. Each managed platform gets
//! one implementation: `appwrite` for the real service and `memory` for the
//! test-suite.

pub mod appwrite;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{ChatRoom, Message, NewMessage, NewProfile, NewRoom, ProfileUpdate, RoomUpdate, User};

/// Errors reported by a backend implementation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Email address is not verified")]
    EmailNotVerified,
    #[error("An account with this email already exists")]
    AlreadyExists,
    #[error("Not signed in")]
    Unauthorized,
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("HTTP {status} for {url}: {body}")]
    Http { status: u16, url: String, body: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Realtime channel: {0}")]
    Realtime(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    /// Opaque credential replayed on every request.
    pub secret: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Scope of a realtime subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Rooms whose participant set contains this user.
    Rooms { participant: String },
    /// Messages of one room.
    Messages { room_id: String },
}

/// What happened to a document. Feeds refetch on any change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub document_id: String,
}

/// Stream of change notifications for one topic. Dropping it ends the subscription.
pub type ChangeStream = mpsc::UnboundedReceiver<BackendResult<Change>>;

/// Identity and session operations.
#[async_trait]
pub trait Account: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session>;
    /// Create the identity and open a session for it.
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Session>;
    /// The signed-in user id, if any.
    async fn current(&self) -> BackendResult<Option<String>>;
    /// Extend the current session.
    async fn refresh(&self) -> BackendResult<Session>;
    async fn sign_out(&self) -> BackendResult<()>;
}

/// Document operations on users, rooms and messages.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> BackendResult<Option<User>>;
    async fn create_user(&self, profile: &NewProfile) -> BackendResult<User>;
    async fn update_user(&self, user_id: &str, update: &ProfileUpdate) -> BackendResult<User>;
    async fn touch_last_active(&self, user_id: &str) -> BackendResult<()>;
    /// Users whose display name starts with `prefix`.
    async fn search_users(&self, prefix: &str) -> BackendResult<Vec<User>>;

    async fn rooms_for(&self, user_id: &str) -> BackendResult<Vec<ChatRoom>>;
    async fn get_room(&self, room_id: &str) -> BackendResult<Option<ChatRoom>>;
    async fn create_room(&self, room: &NewRoom) -> BackendResult<ChatRoom>;
    async fn update_room(&self, room_id: &str, update: &RoomUpdate) -> BackendResult<ChatRoom>;
    async fn delete_room(&self, room_id: &str) -> BackendResult<()>;

    /// Messages of a room, ascending by timestamp.
    async fn messages_in(&self, room_id: &str) -> BackendResult<Vec<Message>>;
    async fn create_message(&self, message: &NewMessage) -> BackendResult<Message>;
    async fn delete_message(&self, room_id: &str, message_id: &str) -> BackendResult<()>;

    async fn subscribe(&self, topic: Topic) -> BackendResult<ChangeStream>;
}

/// Binary object storage for profile pictures.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the bytes and return the new file id.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>, content_type: &str) -> BackendResult<String>;
    async fn delete(&self, file_id: &str) -> BackendResult<()>;
    /// Public URL rendering the file.
    fn preview_url(&self, file_id: &str) -> String;
    /// Recover the file id from a URL built by `preview_url`.
    fn file_id_from_url(&self, url: &str) -> Option<String>;
}
