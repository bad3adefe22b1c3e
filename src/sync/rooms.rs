//! Room membership feed and room management
//!
//! The feed follows every room whose participant set contains the viewer and
//! publishes the room list together with the names of all participants,
//! resolved once per snapshot over the union of participant ids.

use std::collections::BTreeSet;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;

use super::names::{name_of, NameMap, NameResolver};
use super::{FeedHandle, FeedSource, FeedState, Snapshot};
use crate::backend::{BackendResult, Directory, Topic};
use crate::models::{ChatRoom, NewRoom, RoomUpdate, User};

pub type RoomsSnapshot = Snapshot<ChatRoom>;

/// Rooms of one viewer.
pub struct RoomSource {
    directory: Arc<dyn Directory>,
    viewer: String,
}

#[async_trait]
impl FeedSource for RoomSource {
    type Item = ChatRoom;

    fn topic(&self) -> Topic {
        Topic::Rooms {
            participant: self.viewer.clone(),
        }
    }

    async fn fetch(&self) -> BackendResult<Vec<ChatRoom>> {
        self.directory.rooms_for(&self.viewer).await
    }

    fn user_ids(items: &[ChatRoom]) -> BTreeSet<String> {
        items
            .iter()
            .flat_map(|room| room.participants.iter().cloned())
            .collect()
    }
}

/// Names of everyone in `room` except the viewer.
pub fn other_participant_names(room: &ChatRoom, names: &NameMap, viewer: &str) -> Vec<String> {
    room.other_participants(viewer)
        .map(|id| name_of(names, id).to_string())
        .collect()
}

pub struct RoomFeed {
    directory: Arc<dyn Directory>,
    resolver: NameResolver,
    viewer: String,
    tx: watch::Sender<FeedState<RoomsSnapshot>>,
    version: Arc<AtomicU64>,
    handle: Option<FeedHandle>,
}

impl RoomFeed {
    pub fn new(directory: Arc<dyn Directory>, viewer: &str) -> Self {
        let (tx, _) = watch::channel(FeedState::Idle);
        Self {
            resolver: NameResolver::new(Arc::clone(&directory)),
            directory,
            viewer: viewer.to_string(),
            tx,
            version: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    pub fn watch(&self) -> watch::Receiver<FeedState<RoomsSnapshot>> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> FeedState<RoomsSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.handle.as_ref().map_or(false, FeedHandle::is_active)
    }

    /// Start following the viewer's rooms. Any previous subscription is torn down first.
    ///
    /// Failures are logged and published as `FeedState::Error`.
    pub async fn subscribe(&mut self) {
        self.unsubscribe().await;

        let source = RoomSource {
            directory: Arc::clone(&self.directory),
            viewer: self.viewer.clone(),
        };
        match FeedHandle::start(
            source,
            self.directory.as_ref(),
            self.resolver.clone(),
            self.tx.clone(),
            Arc::clone(&self.version),
        )
        .await
        {
            Ok(handle) => {
                tracing::debug!("Following rooms of {}", self.viewer);
                self.handle = Some(handle);
            }
            Err(e) => {
                tracing::warn!("Could not subscribe to rooms of {}: {}", self.viewer, e);
                self.tx.send_replace(FeedState::Error(e.to_string()));
            }
        }
    }

    /// Stop following. Safe to call any number of times.
    pub async fn unsubscribe(&mut self) -> bool {
        match self.handle.take() {
            Some(mut handle) => handle.shutdown().await,
            None => false,
        }
    }

    /// Switch to another user context (e.g. after logout/login).
    pub async fn set_viewer(&mut self, viewer: &str) {
        self.unsubscribe().await;
        self.viewer = viewer.to_string();
        self.tx.send_replace(FeedState::Idle);
    }
}

// ---------------------------------------------------------------------------
// Room management
// ---------------------------------------------------------------------------

async fn load_membership(directory: &dyn Directory, viewer: &str, room_id: &str) -> Result<ChatRoom> {
    let room = directory
        .get_room(room_id)
        .await?
        .with_context(|| format!("Room {} not found", room_id))?;
    if !room.is_participant(viewer) {
        bail!("You are not a participant of {}", room.display_name());
    }
    Ok(room)
}

/// Candidates for a room: users whose name starts with `prefix`, minus the viewer.
pub async fn find_users(directory: &dyn Directory, viewer: &str, prefix: &str) -> Result<Vec<User>> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Ok(Vec::new());
    }
    let users = directory.search_users(prefix).await?;
    Ok(users.into_iter().filter(|u| u.id != viewer).collect())
}

/// Create a room with the viewer as creator.
pub async fn create_room(
    directory: &dyn Directory,
    viewer: &str,
    name: &str,
    others: &[String],
) -> Result<ChatRoom> {
    let room = NewRoom::new(name, viewer, others.iter().cloned())?;
    let created = directory
        .create_room(&room)
        .await
        .context("Failed to create room")?;
    tracing::info!("Created room {} ({})", created.name, created.id);
    Ok(created)
}

pub async fn rename_room(directory: &dyn Directory, viewer: &str, room_id: &str, name: &str) -> Result<ChatRoom> {
    load_membership(directory, viewer, room_id).await?;
    let update = RoomUpdate::rename(name)?;
    Ok(directory.update_room(room_id, &update).await?)
}

pub async fn add_participant(
    directory: &dyn Directory,
    viewer: &str,
    room_id: &str,
    user_id: &str,
) -> Result<ChatRoom> {
    let room = load_membership(directory, viewer, room_id).await?;
    if room.is_participant(user_id) {
        return Ok(room);
    }
    let mut participants = room.participants.clone();
    participants.push(user_id.to_string());
    let update = RoomUpdate::with_participants(&room, participants);
    Ok(directory.update_room(room_id, &update).await?)
}

pub async fn remove_participant(
    directory: &dyn Directory,
    viewer: &str,
    room_id: &str,
    user_id: &str,
) -> Result<ChatRoom> {
    let room = load_membership(directory, viewer, room_id).await?;
    if user_id == room.created_by {
        bail!("The room creator cannot be removed");
    }
    if !room.is_participant(user_id) {
        return Ok(room);
    }
    let participants: Vec<String> = room
        .participants
        .iter()
        .filter(|p| p.as_str() != user_id)
        .cloned()
        .collect();
    let update = RoomUpdate::with_participants(&room, participants);
    Ok(directory.update_room(room_id, &update).await?)
}

/// Delete a room. Any participant may do this.
pub async fn delete_room(directory: &dyn Directory, viewer: &str, room_id: &str) -> Result<()> {
    let room = load_membership(directory, viewer, room_id).await?;
    directory.delete_room(room_id).await?;
    tracing::info!("Deleted room {} ({})", room.display_name(), room_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryServer;
    use std::time::Duration;

    async fn wait_for<F>(rx: &mut watch::Receiver<FeedState<RoomsSnapshot>>, mut pred: F) -> RoomsSnapshot
    where
        F: FnMut(&RoomsSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let FeedState::Subscribed(ref snap) = *rx.borrow_and_update() {
                    if pred(snap) {
                        return snap.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("feed did not publish in time")
    }

    fn seed() -> Arc<MemoryServer> {
        let server = MemoryServer::new();
        server.add_user("U1", "Ann");
        server.add_user("U2", "Bob");
        server.add_user("U3", "Carl");
        server
    }

    #[tokio::test]
    async fn test_names_resolved_once_over_union() {
        let server = seed();
        let u1 = server.client_as("U1");
        create_room(&u1, "U1", "Room A", &["U2".into()]).await.unwrap();
        create_room(&u1, "U1", "Room B", &["U3".into()]).await.unwrap();

        let mut feed = RoomFeed::new(Arc::new(server.client_as("U1")), "U1");
        let mut rx = feed.watch();
        feed.subscribe().await;
        let snap = wait_for(&mut rx, |s| s.items.len() == 2).await;

        let keys: Vec<&str> = snap.names.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["U1", "U2", "U3"]);
        assert_eq!(server.lookups("U1"), 1);
        assert_eq!(server.lookups("U2"), 1);
        assert_eq!(server.lookups("U3"), 1);
        assert_eq!(server.total_lookups(), 3);
        feed.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_feed_follows_new_rooms_and_renames() {
        let server = seed();
        let mut feed = RoomFeed::new(Arc::new(server.client_as("U2")), "U2");
        let mut rx = feed.watch();
        feed.subscribe().await;
        wait_for(&mut rx, |s| s.items.is_empty()).await;

        let u1 = server.client_as("U1");
        let room = create_room(&u1, "U1", "Lunch", &["U2".into()]).await.unwrap();
        let snap = wait_for(&mut rx, |s| s.items.len() == 1).await;
        assert_eq!(
            other_participant_names(&snap.items[0], &snap.names, "U2"),
            vec!["Ann"]
        );

        rename_room(&u1, "U1", &room.id, "Dinner").await.unwrap();
        let snap = wait_for(&mut rx, |s| s.items.first().map_or(false, |r| r.name == "Dinner")).await;
        assert!(snap.version > 1);
    }

    #[tokio::test]
    async fn test_removed_participant_loses_room() {
        let server = seed();
        let u1 = server.client_as("U1");
        let room = create_room(&u1, "U1", "Trio", &["U2".into(), "U3".into()]).await.unwrap();

        let mut feed = RoomFeed::new(Arc::new(server.client_as("U3")), "U3");
        let mut rx = feed.watch();
        feed.subscribe().await;
        wait_for(&mut rx, |s| s.items.len() == 1).await;

        remove_participant(&u1, "U1", &room.id, "U3").await.unwrap();
        wait_for(&mut rx, |s| s.items.is_empty()).await;
    }

    #[tokio::test]
    async fn test_find_users_excludes_viewer() {
        let server = seed();
        server.add_user("U4", "Annika");
        let u1 = server.client_as("U1");
        let found = find_users(&u1, "U1", "Ann").await.unwrap();
        assert_eq!(found.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["U4"]);
        assert!(find_users(&u1, "U1", "  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_creator_cannot_be_removed() {
        let server = seed();
        let u1 = server.client_as("U1");
        let room = create_room(&u1, "U1", "Pair", &["U2".into()]).await.unwrap();
        let u2 = server.client_as("U2");
        assert!(remove_participant(&u2, "U2", &room.id, "U1").await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_error_surfaces_as_error_state() {
        let server = seed();
        let mut feed = RoomFeed::new(Arc::new(server.client_as("U1")), "U1");
        let mut rx = feed.watch();
        feed.subscribe().await;
        wait_for(&mut rx, |_| true).await;

        server.break_subscriptions(
            &Topic::Rooms {
                participant: "U1".into(),
            },
            "socket rejected",
        );
        tokio::time::timeout(Duration::from_secs(2), async {
            while !matches!(*rx.borrow_and_update(), FeedState::Error(_)) {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_signed_out_subscribe_reports_error() {
        let server = seed();
        let mut feed = RoomFeed::new(Arc::new(server.client()), "U1");
        feed.subscribe().await;
        assert!(matches!(feed.state(), FeedState::Error(_)));
        assert!(!feed.is_subscribed());
    }

    #[tokio::test]
    async fn test_set_viewer_tears_down_subscription() {
        let server = seed();
        let mut feed = RoomFeed::new(Arc::new(server.client_as("U1")), "U1");
        feed.subscribe().await;
        assert_eq!(server.listener_count(), 1);

        feed.set_viewer("U2").await;
        assert_eq!(server.listener_count(), 0);
        assert_eq!(feed.state(), FeedState::Idle);
    }
}
