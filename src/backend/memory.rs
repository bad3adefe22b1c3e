//! In-process backend
//!
//! A `MemoryServer` plays the managed platform: it owns accounts, documents,
//! blobs and realtime listeners, and enforces the same ownership rules as the
//! document permissions set by the Appwrite backend. Each `MemoryBackend`
//! handle is one client with its own session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use super::{
    Account, BackendError, BackendResult, BlobStore, Change, ChangeKind, ChangeStream, Directory,
    Session, Topic,
};
use crate::models::{
    ChatRoom, Message, NewMessage, NewProfile, NewRoom, ProfileUpdate, RoomUpdate, User,
};

const PREVIEW_PREFIX: &str = "memory://avatars/";

struct StoredAccount {
    user_id: String,
    password: String,
    verified: bool,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, StoredAccount>,
    users: HashMap<String, User>,
    rooms: Vec<ChatRoom>,
    messages: Vec<Message>,
    blobs: HashMap<String, (Vec<u8>, String)>,
    listeners: Vec<(Topic, mpsc::UnboundedSender<BackendResult<Change>>)>,
    user_lookups: HashMap<String, usize>,
    failing_lookups: HashSet<String>,
}

impl State {
    fn notify(&mut self, topic: &Topic, kind: ChangeKind, document_id: &str) {
        self.listeners.retain(|(t, tx)| {
            if t != topic {
                return !tx.is_closed();
            }
            tx.send(Ok(Change {
                kind: kind.clone(),
                document_id: document_id.to_string(),
            }))
            .is_ok()
        });
    }

    fn notify_room(&mut self, participants: &[String], kind: ChangeKind, room_id: &str) {
        for participant in participants {
            let topic = Topic::Rooms {
                participant: participant.clone(),
            };
            self.notify(&topic, kind.clone(), room_id);
        }
    }

    fn room(&self, room_id: &str) -> Option<&ChatRoom> {
        self.rooms.iter().find(|r| r.id == room_id)
    }
}

/// Shared in-process "platform".
#[derive(Default)]
pub struct MemoryServer {
    state: Mutex<State>,
}

impl MemoryServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A client with no session.
    pub fn client(self: &Arc<Self>) -> MemoryBackend {
        MemoryBackend {
            server: Arc::clone(self),
            session: Mutex::new(None),
        }
    }

    /// A client already signed in as `user_id`.
    pub fn client_as(self: &Arc<Self>, user_id: &str) -> MemoryBackend {
        MemoryBackend {
            server: Arc::clone(self),
            session: Mutex::new(Some(user_id.to_string())),
        }
    }

    /// Seed a user profile directly.
    pub fn add_user(&self, user_id: &str, display_name: &str) {
        let now = Utc::now();
        self.lock().users.insert(
            user_id.to_string(),
            User {
                id: user_id.to_string(),
                email: format!("{}@example.com", user_id),
                display_name: display_name.to_string(),
                bio: String::new(),
                avatar_url: None,
                content_filter: Default::default(),
                created_at: now,
                last_active: now,
            },
        );
    }

    /// Seed a room with a fixed id. The first participant is the creator.
    pub fn add_room(&self, room_id: &str, name: &str, participants: &[&str]) {
        let room = ChatRoom {
            id: room_id.to_string(),
            name: name.to_string(),
            participants: participants.iter().map(|p| p.to_string()).collect(),
            created_by: participants.first().map(|p| p.to_string()).unwrap_or_default(),
            created_at: Utc::now(),
        };
        self.lock().rooms.push(room);
    }

    /// Seed an account that has not confirmed its email yet.
    pub fn add_unverified_account(&self, email: &str, password: &str) {
        self.lock().accounts.insert(
            email.to_string(),
            StoredAccount {
                user_id: uuid::Uuid::new_v4().to_string(),
                password: password.to_string(),
                verified: false,
            },
        );
    }

    /// Make every lookup of this user fail.
    pub fn fail_lookups_for(&self, user_id: &str) {
        self.lock().failing_lookups.insert(user_id.to_string());
    }

    /// Number of `get_user` calls made for this user.
    pub fn lookups(&self, user_id: &str) -> usize {
        self.lock().user_lookups.get(user_id).copied().unwrap_or(0)
    }

    pub fn total_lookups(&self) -> usize {
        self.lock().user_lookups.values().sum()
    }

    /// Deliver an error to every listener of `topic`.
    pub fn break_subscriptions(&self, topic: &Topic, reason: &str) {
        let mut state = self.lock();
        state.listeners.retain(|(t, tx)| {
            if t == topic {
                let _ = tx.send(Err(BackendError::Realtime(reason.to_string())));
                false
            } else {
                true
            }
        });
    }

    pub fn listener_count(&self) -> usize {
        let mut state = self.lock();
        state.listeners.retain(|(_, tx)| !tx.is_closed());
        state.listeners.len()
    }

    pub fn user(&self, user_id: &str) -> Option<User> {
        self.lock().users.get(user_id).cloned()
    }

    pub fn message_count(&self, room_id: &str) -> usize {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .count()
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }
}

/// One client of a `MemoryServer`.
pub struct MemoryBackend {
    server: Arc<MemoryServer>,
    session: Mutex<Option<String>>,
}

impl MemoryBackend {
    fn acting(&self) -> BackendResult<String> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(BackendError::Unauthorized)
    }

    fn set_session(&self, user_id: Option<String>) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = user_id;
    }
}

fn session_for(user_id: &str, email: &str) -> Session {
    Session {
        user_id: user_id.to_string(),
        email: email.to_string(),
        secret: format!("memory-session-{}", user_id),
        expires_at: Some(Utc::now() + chrono::Duration::days(365)),
    }
}

#[async_trait]
impl Account for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let user_id = {
            let state = self.server.lock();
            let account = state
                .accounts
                .get(email)
                .filter(|a| a.password == password)
                .ok_or(BackendError::InvalidCredentials)?;
            if !account.verified {
                return Err(BackendError::EmailNotVerified);
            }
            account.user_id.clone()
        };
        self.set_session(Some(user_id.clone()));
        Ok(session_for(&user_id, email))
    }

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Session> {
        if password.len() < 8 {
            return Err(BackendError::Invalid(
                "password must be at least 8 characters".into(),
            ));
        }
        let user_id = {
            let mut state = self.server.lock();
            if state.accounts.contains_key(email) {
                return Err(BackendError::AlreadyExists);
            }
            let user_id = uuid::Uuid::new_v4().to_string();
            state.accounts.insert(
                email.to_string(),
                StoredAccount {
                    user_id: user_id.clone(),
                    password: password.to_string(),
                    verified: true,
                },
            );
            user_id
        };
        self.set_session(Some(user_id.clone()));
        Ok(session_for(&user_id, email))
    }

    async fn current(&self) -> BackendResult<Option<String>> {
        Ok(self.session.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn refresh(&self) -> BackendResult<Session> {
        let user_id = self.acting()?;
        let email = self
            .server
            .lock()
            .accounts
            .iter()
            .find(|(_, a)| a.user_id == user_id)
            .map(|(email, _)| email.clone())
            .unwrap_or_default();
        Ok(session_for(&user_id, &email))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.acting()?;
        self.set_session(None);
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryBackend {
    async fn get_user(&self, user_id: &str) -> BackendResult<Option<User>> {
        self.acting()?;
        let mut state = self.server.lock();
        *state.user_lookups.entry(user_id.to_string()).or_default() += 1;
        if state.failing_lookups.contains(user_id) {
            return Err(BackendError::Http {
                status: 500,
                url: format!("memory://users/{}", user_id),
                body: "injected failure".into(),
            });
        }
        Ok(state.users.get(user_id).cloned())
    }

    async fn create_user(&self, profile: &NewProfile) -> BackendResult<User> {
        let acting = self.acting()?;
        if acting != profile.id {
            return Err(BackendError::PermissionDenied(
                "profiles can only be created by their owner".into(),
            ));
        }
        let now = Utc::now();
        let user = User {
            id: profile.id.clone(),
            email: profile.email.clone(),
            display_name: profile.display_name.clone(),
            bio: profile.bio.clone(),
            avatar_url: None,
            content_filter: profile.content_filter,
            created_at: now,
            last_active: now,
        };
        let mut state = self.server.lock();
        if state.users.contains_key(&profile.id) {
            return Err(BackendError::AlreadyExists);
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_user(&self, user_id: &str, update: &ProfileUpdate) -> BackendResult<User> {
        let acting = self.acting()?;
        if acting != user_id {
            return Err(BackendError::PermissionDenied(
                "profiles can only be edited by their owner".into(),
            ));
        }
        let mut state = self.server.lock();
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| BackendError::NotFound(format!("user {}", user_id)))?;
        update.apply_to(user);
        Ok(user.clone())
    }

    async fn touch_last_active(&self, user_id: &str) -> BackendResult<()> {
        let acting = self.acting()?;
        if acting != user_id {
            return Err(BackendError::PermissionDenied(
                "profiles can only be edited by their owner".into(),
            ));
        }
        let mut state = self.server.lock();
        if let Some(user) = state.users.get_mut(user_id) {
            user.last_active = Utc::now();
        }
        Ok(())
    }

    async fn search_users(&self, prefix: &str) -> BackendResult<Vec<User>> {
        self.acting()?;
        let state = self.server.lock();
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.display_name.starts_with(prefix))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(users)
    }

    async fn rooms_for(&self, user_id: &str) -> BackendResult<Vec<ChatRoom>> {
        self.acting()?;
        let state = self.server.lock();
        Ok(state
            .rooms
            .iter()
            .filter(|r| r.is_participant(user_id))
            .cloned()
            .collect())
    }

    async fn get_room(&self, room_id: &str) -> BackendResult<Option<ChatRoom>> {
        let acting = self.acting()?;
        let state = self.server.lock();
        Ok(state
            .room(room_id)
            .filter(|r| r.is_participant(&acting))
            .cloned())
    }

    async fn create_room(&self, room: &NewRoom) -> BackendResult<ChatRoom> {
        let acting = self.acting()?;
        if acting != room.created_by {
            return Err(BackendError::PermissionDenied(
                "rooms are created by the signed-in user".into(),
            ));
        }
        let created = ChatRoom {
            id: uuid::Uuid::new_v4().to_string(),
            name: room.name.clone(),
            participants: room.participants.clone(),
            created_by: room.created_by.clone(),
            created_at: Utc::now(),
        };
        let mut state = self.server.lock();
        state.rooms.push(created.clone());
        state.notify_room(&created.participants, ChangeKind::Created, &created.id);
        Ok(created)
    }

    async fn update_room(&self, room_id: &str, update: &RoomUpdate) -> BackendResult<ChatRoom> {
        let acting = self.acting()?;
        let mut state = self.server.lock();
        let room = state
            .rooms
            .iter_mut()
            .find(|r| r.id == room_id && r.is_participant(&acting))
            .ok_or_else(|| BackendError::NotFound(format!("room {}", room_id)))?;
        let before = room.participants.clone();
        update.apply_to(room);
        let updated = room.clone();

        let mut affected = before;
        for p in &updated.participants {
            if !affected.contains(p) {
                affected.push(p.clone());
            }
        }
        state.notify_room(&affected, ChangeKind::Updated, room_id);
        Ok(updated)
    }

    async fn delete_room(&self, room_id: &str) -> BackendResult<()> {
        let acting = self.acting()?;
        let mut state = self.server.lock();
        let idx = state
            .rooms
            .iter()
            .position(|r| r.id == room_id && r.is_participant(&acting))
            .ok_or_else(|| BackendError::NotFound(format!("room {}", room_id)))?;
        let room = state.rooms.remove(idx);
        state.messages.retain(|m| m.room_id != room_id);
        state.notify_room(&room.participants, ChangeKind::Deleted, room_id);
        Ok(())
    }

    async fn messages_in(&self, room_id: &str) -> BackendResult<Vec<Message>> {
        let acting = self.acting()?;
        let state = self.server.lock();
        if !state.room(room_id).map_or(false, |r| r.is_participant(&acting)) {
            return Err(BackendError::NotFound(format!("room {}", room_id)));
        }
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn create_message(&self, message: &NewMessage) -> BackendResult<Message> {
        let acting = self.acting()?;
        if acting != message.sender_id {
            return Err(BackendError::PermissionDenied(
                "messages are sent by the signed-in user".into(),
            ));
        }
        let mut state = self.server.lock();
        if !state
            .room(&message.room_id)
            .map_or(false, |r| r.is_participant(&acting))
        {
            return Err(BackendError::NotFound(format!("room {}", message.room_id)));
        }
        let created = Message {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: message.room_id.clone(),
            sender_id: message.sender_id.clone(),
            gif_url: message.gif_url.clone(),
            timestamp: Utc::now(),
        };
        state.messages.push(created.clone());
        let topic = Topic::Messages {
            room_id: created.room_id.clone(),
        };
        state.notify(&topic, ChangeKind::Created, &created.id);
        Ok(created)
    }

    async fn delete_message(&self, room_id: &str, message_id: &str) -> BackendResult<()> {
        let acting = self.acting()?;
        let mut state = self.server.lock();
        let idx = state
            .messages
            .iter()
            .position(|m| m.id == message_id && m.room_id == room_id)
            .ok_or_else(|| BackendError::NotFound(format!("message {}", message_id)))?;
        if state.messages[idx].sender_id != acting {
            return Err(BackendError::PermissionDenied(
                "only the sender can delete a message".into(),
            ));
        }
        state.messages.remove(idx);
        let topic = Topic::Messages {
            room_id: room_id.to_string(),
        };
        state.notify(&topic, ChangeKind::Deleted, message_id);
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> BackendResult<ChangeStream> {
        self.acting()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.server.lock().listeners.push((topic, tx));
        Ok(rx)
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn upload(&self, _file_name: &str, bytes: Vec<u8>, content_type: &str) -> BackendResult<String> {
        self.acting()?;
        if bytes.is_empty() {
            return Err(BackendError::Invalid("empty upload".into()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.server
            .lock()
            .blobs
            .insert(id.clone(), (bytes, content_type.to_string()));
        Ok(id)
    }

    async fn delete(&self, file_id: &str) -> BackendResult<()> {
        self.acting()?;
        self.server
            .lock()
            .blobs
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("file {}", file_id)))
    }

    fn preview_url(&self, file_id: &str) -> String {
        format!("{}{}/preview", PREVIEW_PREFIX, file_id)
    }

    fn file_id_from_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(PREVIEW_PREFIX)?
            .strip_suffix("/preview")
            .map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GifUrl;

    #[tokio::test]
    async fn test_only_sender_deletes_message() {
        let server = MemoryServer::new();
        server.add_user("u1", "Ann");
        server.add_user("u2", "Bob");
        let ann = server.client_as("u1");
        let bob = server.client_as("u2");

        let room = ann
            .create_room(&NewRoom::new("pair", "u1", ["u2"]).unwrap())
            .await
            .unwrap();
        let gif = GifUrl::parse("https://x/g.gif").unwrap();
        let msg = ann
            .create_message(&NewMessage::new(&room.id, "u1", gif))
            .await
            .unwrap();

        let err = bob.delete_message(&room.id, &msg.id).await.unwrap_err();
        assert!(matches!(err, BackendError::PermissionDenied(_)));
        ann.delete_message(&room.id, &msg.id).await.unwrap();
        assert_eq!(server.message_count(&room.id), 0);
    }

    #[tokio::test]
    async fn test_profile_edit_requires_owner() {
        let server = MemoryServer::new();
        server.add_user("u1", "Ann");
        let bob = server.client_as("u2");
        let update = ProfileUpdate {
            bio: Some("hacked".into()),
            ..Default::default()
        };
        let err = bob.update_user("u1", &update).await.unwrap_err();
        assert!(matches!(err, BackendError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_room_changes_notify_participants() {
        let server = MemoryServer::new();
        let ann = server.client_as("u1");
        let mut ann_rooms = ann
            .subscribe(Topic::Rooms {
                participant: "u1".into(),
            })
            .await
            .unwrap();
        let mut carl_rooms = server
            .client_as("u3")
            .subscribe(Topic::Rooms {
                participant: "u3".into(),
            })
            .await
            .unwrap();

        let room = ann
            .create_room(&NewRoom::new("pair", "u1", ["u2"]).unwrap())
            .await
            .unwrap();
        let change = ann_rooms.recv().await.unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Created);
        assert_eq!(change.document_id, room.id);
        assert!(carl_rooms.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signed_out_client_is_rejected() {
        let server = MemoryServer::new();
        let anon = server.client();
        assert!(matches!(
            anon.get_user("u1").await.unwrap_err(),
            BackendError::Unauthorized
        ));
    }
}
