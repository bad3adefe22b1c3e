//! Databases API: users, chat rooms and messages

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{permission, query, realtime, AppwriteBackend};
use crate::backend::{BackendError, BackendResult, ChangeStream, Directory, Topic};
use crate::models::{
    ChatRoom, ContentFilter, GifUrl, Message, NewMessage, NewProfile, NewRoom, ProfileUpdate,
    RoomUpdate, User,
};

const PAGE_LIMIT: u32 = 100;
const USER_SEARCH_LIMIT: u32 = 25;

// -- Wire types for document responses --

#[derive(Debug, Deserialize)]
struct DocumentList<T> {
    documents: Vec<T>,
}

/// Anything listed from a collection; the id drives cursor pagination.
trait Document: for<'de> Deserialize<'de> {
    fn document_id(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct UserDocument {
    #[serde(rename = "$id")]
    id: String,
    #[serde(rename = "$createdAt")]
    created_at: DateTime<Utc>,
    email: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    bio: Option<String>,
    #[serde(rename = "avatarUrl")]
    avatar_url: Option<String>,
    #[serde(rename = "contentFilter")]
    content_filter: Option<String>,
    #[serde(rename = "lastActive")]
    last_active: Option<DateTime<Utc>>,
}

impl Document for UserDocument {
    fn document_id(&self) -> &str {
        &self.id
    }
}

impl From<UserDocument> for User {
    fn from(doc: UserDocument) -> Self {
        let content_filter = doc
            .content_filter
            .as_deref()
            .and_then(|f| f.parse::<ContentFilter>().ok())
            .unwrap_or_default();
        User {
            last_active: doc.last_active.unwrap_or(doc.created_at),
            id: doc.id,
            email: doc.email.unwrap_or_default(),
            display_name: doc.display_name.unwrap_or_default(),
            bio: doc.bio.unwrap_or_default(),
            avatar_url: doc.avatar_url.filter(|u| !u.is_empty()),
            content_filter,
            created_at: doc.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoomDocument {
    #[serde(rename = "$id")]
    id: String,
    #[serde(rename = "$createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "chatName")]
    chat_name: Option<String>,
    #[serde(default)]
    participants: Vec<String>,
    #[serde(rename = "createdBy")]
    created_by: Option<String>,
}

impl Document for RoomDocument {
    fn document_id(&self) -> &str {
        &self.id
    }
}

impl From<RoomDocument> for ChatRoom {
    fn from(doc: RoomDocument) -> Self {
        let created_by = doc
            .created_by
            .or_else(|| doc.participants.first().cloned())
            .unwrap_or_default();
        ChatRoom {
            id: doc.id,
            name: doc.chat_name.unwrap_or_default(),
            participants: doc.participants,
            created_by,
            created_at: doc.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageDocument {
    #[serde(rename = "$id")]
    id: String,
    #[serde(rename = "$createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "roomId")]
    room_id: String,
    #[serde(rename = "senderId")]
    sender_id: String,
    #[serde(rename = "gifUrl")]
    gif_url: Option<String>,
}

impl Document for MessageDocument {
    fn document_id(&self) -> &str {
        &self.id
    }
}

impl MessageDocument {
    /// Messages without a usable GIF URL are not renderable and are dropped.
    fn into_message(self) -> Option<Message> {
        let gif_url = match GifUrl::parse(self.gif_url.as_deref().unwrap_or("")) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Skipping message {}: {}", self.id, e);
                return None;
            }
        };
        Some(Message {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            gif_url,
            timestamp: self.created_at,
        })
    }
}

impl AppwriteBackend {
    async fn list<T: Document>(&self, collection: &str, queries: Vec<String>) -> BackendResult<Vec<T>> {
        let params: Vec<(&str, String)> = queries.into_iter().map(|q| ("queries[]", q)).collect();
        let resp = self
            .client
            .get(&self.collection_path(collection), &params)
            .await?;
        let list: DocumentList<T> = resp.json().await?;
        Ok(list.documents)
    }

    /// Every matching document, one page at a time via `cursorAfter`.
    /// Stops at the first short page.
    async fn list_all<T: Document>(&self, collection: &str, queries: Vec<String>) -> BackendResult<Vec<T>> {
        let mut all: Vec<T> = Vec::new();
        loop {
            let mut page_queries = queries.clone();
            page_queries.push(query::limit(PAGE_LIMIT));
            if let Some(last) = all.last() {
                page_queries.push(query::cursor_after(last.document_id()));
            }

            let page: Vec<T> = self.list(collection, page_queries).await?;
            let fetched = page.len();
            all.extend(page);
            if fetched < PAGE_LIMIT as usize {
                return Ok(all);
            }
            tracing::debug!("Fetched {} documents from {} so far", all.len(), collection);
        }
    }

    async fn get_optional<T: Document>(
        &self,
        collection: &str,
        id: &str,
    ) -> BackendResult<Option<T>> {
        match self.client.get(&self.document_path(collection, id), &[]).await {
            Ok(resp) => Ok(Some(resp.json().await?)),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn current_user_id(&self) -> BackendResult<String> {
        use crate::backend::Account;
        self.current().await?.ok_or(BackendError::Unauthorized)
    }
}

#[async_trait]
impl Directory for AppwriteBackend {
    async fn get_user(&self, user_id: &str) -> BackendResult<Option<User>> {
        let doc: Option<UserDocument> = self
            .get_optional(&self.settings.users_collection, user_id)
            .await?;
        Ok(doc.map(User::from))
    }

    async fn create_user(&self, profile: &NewProfile) -> BackendResult<User> {
        let body = json!({
            "documentId": profile.id,
            "data": {
                "email": profile.email,
                "displayName": profile.display_name,
                "bio": profile.bio,
                "contentFilter": profile.content_filter.as_str(),
            },
            "permissions": permission::for_profile(&profile.id),
        });
        let resp = self
            .client
            .post(&self.collection_path(&self.settings.users_collection), &body)
            .await?;
        let doc: UserDocument = resp.json().await?;
        Ok(doc.into())
    }

    async fn update_user(&self, user_id: &str, update: &ProfileUpdate) -> BackendResult<User> {
        let body = json!({ "data": update });
        let resp = self
            .client
            .patch(&self.document_path(&self.settings.users_collection, user_id), &body)
            .await?;
        let doc: UserDocument = resp.json().await?;
        Ok(doc.into())
    }

    async fn touch_last_active(&self, user_id: &str) -> BackendResult<()> {
        let body = json!({ "data": { "lastActive": Utc::now().to_rfc3339() } });
        self.client
            .patch(&self.document_path(&self.settings.users_collection, user_id), &body)
            .await?;
        Ok(())
    }

    async fn search_users(&self, prefix: &str) -> BackendResult<Vec<User>> {
        let docs: Vec<UserDocument> = self
            .list(
                &self.settings.users_collection,
                vec![
                    query::starts_with("displayName", prefix),
                    query::limit(USER_SEARCH_LIMIT),
                ],
            )
            .await?;
        Ok(docs.into_iter().map(User::from).collect())
    }

    async fn rooms_for(&self, user_id: &str) -> BackendResult<Vec<ChatRoom>> {
        let docs: Vec<RoomDocument> = self
            .list_all(
                &self.settings.rooms_collection,
                vec![query::contains("participants", user_id)],
            )
            .await?;
        Ok(docs.into_iter().map(ChatRoom::from).collect())
    }

    async fn get_room(&self, room_id: &str) -> BackendResult<Option<ChatRoom>> {
        let doc: Option<RoomDocument> = self
            .get_optional(&self.settings.rooms_collection, room_id)
            .await?;
        Ok(doc.map(ChatRoom::from))
    }

    async fn create_room(&self, room: &NewRoom) -> BackendResult<ChatRoom> {
        let body = json!({
            "documentId": "unique()",
            "data": {
                "chatName": room.name,
                "participants": room.participants,
                "createdBy": room.created_by,
            },
            "permissions": permission::for_room(&room.participants),
        });
        let resp = self
            .client
            .post(&self.collection_path(&self.settings.rooms_collection), &body)
            .await?;
        let doc: RoomDocument = resp.json().await?;
        Ok(doc.into())
    }

    /// Data and permissions are written separately. Realtime only delivers
    /// an event to users who can read the document afterwards, so removed
    /// members hear the data update (still readable) and added members hear
    /// the permission update (readable from then on).
    async fn update_room(&self, room_id: &str, update: &RoomUpdate) -> BackendResult<ChatRoom> {
        let path = self.document_path(&self.settings.rooms_collection, room_id);
        let resp = self.client.patch(&path, &json!({ "data": update })).await?;
        let mut doc: RoomDocument = resp.json().await?;

        if let Some(ref participants) = update.participants {
            let body = json!({ "permissions": permission::for_room(participants) });
            let resp = self.client.patch(&path, &body).await?;
            doc = resp.json().await?;
        }
        Ok(doc.into())
    }

    async fn delete_room(&self, room_id: &str) -> BackendResult<()> {
        self.client
            .delete(&self.document_path(&self.settings.rooms_collection, room_id))
            .await?;
        Ok(())
    }

    async fn messages_in(&self, room_id: &str) -> BackendResult<Vec<Message>> {
        let docs: Vec<MessageDocument> = self
            .list_all(
                &self.settings.messages_collection,
                vec![
                    query::equal("roomId", room_id),
                    query::order_asc("$createdAt"),
                ],
            )
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(MessageDocument::into_message)
            .collect())
    }

    async fn create_message(&self, message: &NewMessage) -> BackendResult<Message> {
        let room = self
            .get_room(&message.room_id)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("room {}", message.room_id)))?;

        let body = json!({
            "documentId": "unique()",
            "data": {
                "roomId": message.room_id,
                "senderId": message.sender_id,
                "gifUrl": message.gif_url.as_str(),
            },
            "permissions": permission::for_message(&room.participants, &message.sender_id),
        });
        let resp = self
            .client
            .post(&self.collection_path(&self.settings.messages_collection), &body)
            .await?;
        let doc: MessageDocument = resp.json().await?;
        doc.into_message()
            .ok_or_else(|| BackendError::Invalid("server stored a message without a GIF URL".into()))
    }

    async fn delete_message(&self, _room_id: &str, message_id: &str) -> BackendResult<()> {
        self.client
            .delete(&self.document_path(&self.settings.messages_collection, message_id))
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> BackendResult<ChangeStream> {
        // Fail fast without a session; the socket would otherwise connect anonymously.
        self.current_user_id().await?;

        let collection = match topic {
            Topic::Rooms { .. } => &self.settings.rooms_collection,
            Topic::Messages { .. } => &self.settings.messages_collection,
        };
        let target = realtime::RealtimeTarget {
            endpoint: self.client.endpoint().to_string(),
            project: self.client.project().to_string(),
            channel: self.channel(collection),
            cookie: self.client.cookie_header(),
        };
        Ok(realtime::spawn_subscription(target, topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backend::appwrite::AppwriteSettings;
    use axum::extract::{Path, Query, State};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// Stand-in for the Databases API: a fixed message list honouring
    /// `limit`/`cursorAfter`, and room PATCHes recorded as sent.
    #[derive(Default)]
    struct FakeDatabase {
        messages: Vec<serde_json::Value>,
        patches: Mutex<Vec<serde_json::Value>>,
    }

    fn message_doc(n: usize) -> serde_json::Value {
        json!({
            "$id": format!("m{}", n),
            "$createdAt": "2024-05-01T10:00:00.000+00:00",
            "roomId": "R42",
            "senderId": "u1",
            "gifUrl": format!("https://media.klipy.com/{}.gif", n)
        })
    }

    async fn list_documents(
        State(db): State<Arc<FakeDatabase>>,
        Query(params): Query<Vec<(String, String)>>,
    ) -> Json<serde_json::Value> {
        let mut limit = 25;
        let mut after: Option<String> = None;
        for (_, raw) in params.iter().filter(|(k, _)| k == "queries[]") {
            let q: serde_json::Value = serde_json::from_str(raw).unwrap();
            match q["method"].as_str() {
                Some("limit") => limit = q["values"][0].as_u64().unwrap() as usize,
                Some("cursorAfter") => after = q["values"][0].as_str().map(String::from),
                _ => {}
            }
        }
        let start = match after {
            Some(id) => db.messages.iter().position(|m| m["$id"] == id.as_str()).unwrap() + 1,
            None => 0,
        };
        let page: Vec<_> = db.messages.iter().skip(start).take(limit).cloned().collect();
        Json(json!({ "total": db.messages.len(), "documents": page }))
    }

    async fn patch_document(
        State(db): State<Arc<FakeDatabase>>,
        Path((_db, _collection, id)): Path<(String, String, String)>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        db.patches.lock().unwrap().push(body);
        Json(json!({
            "$id": id,
            "$createdAt": "2024-05-01T10:00:00.000+00:00",
            "chatName": "Friends",
            "participants": ["u1", "u2"],
            "createdBy": "u1"
        }))
    }

    async fn backend_for(db: Arc<FakeDatabase>) -> AppwriteBackend {
        let app = Router::new()
            .route("/databases/:db/collections/:collection/documents", get(list_documents))
            .route(
                "/databases/:db/collections/:collection/documents/:id",
                axum::routing::patch(patch_document),
            )
            .with_state(db);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let settings = AppwriteSettings {
            endpoint: format!("http://{}", addr),
            project: "vibe".into(),
            ..Default::default()
        };
        AppwriteBackend::new(settings, None)
    }

    #[tokio::test]
    async fn test_messages_in_reads_past_first_page() {
        let db = Arc::new(FakeDatabase {
            messages: (0..150).map(message_doc).collect(),
            ..Default::default()
        });
        let backend = backend_for(db).await;

        let messages = backend.messages_in("R42").await.unwrap();
        assert_eq!(messages.len(), 150);
        assert_eq!(messages.first().map(|m| m.id.as_str()), Some("m0"));
        assert_eq!(messages.last().map(|m| m.id.as_str()), Some("m149"));
    }

    #[tokio::test]
    async fn test_messages_in_exact_page_boundary() {
        let db = Arc::new(FakeDatabase {
            messages: (0..PAGE_LIMIT as usize).map(message_doc).collect(),
            ..Default::default()
        });
        let backend = backend_for(db).await;

        let messages = backend.messages_in("R42").await.unwrap();
        assert_eq!(messages.len(), PAGE_LIMIT as usize);
    }

    #[tokio::test]
    async fn test_membership_change_writes_data_before_permissions() {
        let db = Arc::new(FakeDatabase::default());
        let backend = backend_for(db.clone()).await;

        let update = RoomUpdate {
            name: None,
            participants: Some(vec!["u1".into(), "u2".into()]),
        };
        let room = backend.update_room("r1", &update).await.unwrap();
        assert_eq!(room.participants, vec!["u1", "u2"]);

        let patches = db.patches.lock().unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0]["data"]["participants"], json!(["u1", "u2"]));
        assert!(patches[0].get("permissions").is_none());
        assert!(patches[1].get("data").is_none());
        let perms = patches[1]["permissions"].as_array().unwrap();
        assert!(perms.contains(&json!("read(\"user:u2\")")));
        assert!(!perms.contains(&json!("read(\"user:u3\")")));
    }

    #[tokio::test]
    async fn test_rename_is_a_single_write() {
        let db = Arc::new(FakeDatabase::default());
        let backend = backend_for(db.clone()).await;

        backend
            .update_room("r1", &RoomUpdate::rename("Besties").unwrap())
            .await
            .unwrap();
        let patches = db.patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0]["data"]["chatName"], "Besties");
    }

    #[test]
    fn test_user_document_defaults() {
        let doc: UserDocument = serde_json::from_value(json!({
            "$id": "u1",
            "$createdAt": "2024-05-01T10:00:00.000+00:00",
            "email": "a@b.com",
            "displayName": "Ann",
            "contentFilter": "bogus"
        }))
        .unwrap();
        let user = User::from(doc);
        assert_eq!(user.display_name, "Ann");
        assert_eq!(user.content_filter, ContentFilter::Off);
        assert_eq!(user.last_active, user.created_at);
        assert!(user.bio.is_empty());
    }

    #[test]
    fn test_room_document_falls_back_to_first_participant() {
        let doc: RoomDocument = serde_json::from_value(json!({
            "$id": "r1",
            "$createdAt": "2024-05-01T10:00:00.000+00:00",
            "chatName": "Friends",
            "participants": ["u1", "u2"]
        }))
        .unwrap();
        let room = ChatRoom::from(doc);
        assert_eq!(room.created_by, "u1");
    }

    #[test]
    fn test_message_document_without_gif_is_dropped() {
        let doc: MessageDocument = serde_json::from_value(json!({
            "$id": "m1",
            "$createdAt": "2024-05-01T10:00:00.000+00:00",
            "roomId": "r1",
            "senderId": "u1",
            "gifUrl": ""
        }))
        .unwrap();
        assert!(doc.into_message().is_none());
    }
}
