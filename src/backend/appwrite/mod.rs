//! Appwrite backend
//!
//! Account, Databases, Storage and Realtime over the Appwrite REST and
//! websocket APIs. Ownership rules live in document permissions so the
//! server enforces them.

mod account;
pub mod client;
mod documents;
mod realtime;
mod storage;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use client::AppwriteClient;

/// Where the project's collections and bucket live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppwriteSettings {
    pub endpoint: String,
    pub project: String,
    pub database: String,
    pub users_collection: String,
    pub rooms_collection: String,
    pub messages_collection: String,
    pub avatar_bucket: String,
}

impl Default for AppwriteSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://cloud.appwrite.io/v1".to_string(),
            project: String::new(),
            database: "main".to_string(),
            users_collection: "users".to_string(),
            rooms_collection: "chatrooms".to_string(),
            messages_collection: "messages".to_string(),
            avatar_bucket: "avatars".to_string(),
        }
    }
}

/// Appwrite implementation of `Account`, `Directory` and `BlobStore`.
#[derive(Clone)]
pub struct AppwriteBackend {
    client: Arc<AppwriteClient>,
    settings: AppwriteSettings,
}

impl AppwriteBackend {
    pub fn new(settings: AppwriteSettings, session: Option<String>) -> Self {
        let client = AppwriteClient::new(&settings.endpoint, &settings.project, session);
        Self {
            client: Arc::new(client),
            settings,
        }
    }

    fn collection_path(&self, collection: &str) -> String {
        format!(
            "/databases/{}/collections/{}/documents",
            self.settings.database, collection
        )
    }

    fn document_path(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.collection_path(collection), id)
    }

    /// Realtime channel name for every document of a collection.
    fn channel(&self, collection: &str) -> String {
        format!(
            "databases.{}.collections.{}.documents",
            self.settings.database, collection
        )
    }
}

/// Permission strings understood by Appwrite.
mod permission {
    pub fn read_any_user() -> String {
        "read(\"users\")".to_string()
    }

    pub fn read(user_id: &str) -> String {
        format!("read(\"user:{}\")", user_id)
    }

    pub fn update(user_id: &str) -> String {
        format!("update(\"user:{}\")", user_id)
    }

    pub fn delete(user_id: &str) -> String {
        format!("delete(\"user:{}\")", user_id)
    }

    pub fn read_any() -> String {
        "read(\"any\")".to_string()
    }

    /// Full control for every participant of a room.
    pub fn for_room(participants: &[String]) -> Vec<String> {
        let mut perms = Vec::with_capacity(participants.len() * 3);
        for p in participants {
            perms.push(read(p));
            perms.push(update(p));
            perms.push(delete(p));
        }
        perms
    }

    /// Readable by the room, removable only by the sender.
    pub fn for_message(participants: &[String], sender: &str) -> Vec<String> {
        let mut perms: Vec<String> = participants.iter().map(|p| read(p)).collect();
        perms.push(delete(sender));
        perms
    }

    /// Readable by any signed-in user, editable only by the owner.
    pub fn for_profile(owner: &str) -> Vec<String> {
        vec![read_any_user(), update(owner), delete(owner)]
    }
}

/// Query strings (Appwrite 1.5 JSON query syntax).
mod query {
    use serde_json::json;

    pub fn contains(attribute: &str, value: &str) -> String {
        json!({"method": "contains", "attribute": attribute, "values": [value]}).to_string()
    }

    pub fn equal(attribute: &str, value: &str) -> String {
        json!({"method": "equal", "attribute": attribute, "values": [value]}).to_string()
    }

    pub fn starts_with(attribute: &str, value: &str) -> String {
        json!({"method": "startsWith", "attribute": attribute, "values": [value]}).to_string()
    }

    pub fn order_asc(attribute: &str) -> String {
        json!({"method": "orderAsc", "attribute": attribute}).to_string()
    }

    pub fn limit(n: u32) -> String {
        json!({"method": "limit", "values": [n]}).to_string()
    }

    pub fn cursor_after(document_id: &str) -> String {
        json!({"method": "cursorAfter", "values": [document_id]}).to_string()
    }
}
