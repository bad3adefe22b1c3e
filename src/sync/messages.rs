//! Message feed of the selected room
//!
//! At most one room is followed at a time. Selecting another room tears the
//! old subscription down before the new one is opened. With no room selected
//! the feed publishes `MessageFeedState::NoRoom`, which is distinct from a
//! room that has no messages.

use std::collections::BTreeSet;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;

use super::names::NameResolver;
use super::{FeedHandle, FeedSink, FeedSource, FeedState, Snapshot};
use crate::backend::{BackendResult, Directory, Topic};
use crate::models::{GifUrl, Message, NewMessage};

pub type MessagesSnapshot = Snapshot<Message>;

#[derive(Debug, Clone, PartialEq)]
pub enum MessageFeedState {
    NoRoom,
    Room {
        room_id: String,
        state: FeedState<MessagesSnapshot>,
    },
}

impl MessageFeedState {
    pub fn room_id(&self) -> Option<&str> {
        match self {
            MessageFeedState::NoRoom => None,
            MessageFeedState::Room { room_id, .. } => Some(room_id),
        }
    }

    pub fn snapshot(&self) -> Option<&MessagesSnapshot> {
        match self {
            MessageFeedState::NoRoom => None,
            MessageFeedState::Room { state, .. } => state.snapshot(),
        }
    }
}

/// Messages of one room, oldest first.
pub struct MessageSource {
    directory: Arc<dyn Directory>,
    room_id: String,
}

#[async_trait]
impl FeedSource for MessageSource {
    type Item = Message;

    fn topic(&self) -> Topic {
        Topic::Messages {
            room_id: self.room_id.clone(),
        }
    }

    async fn fetch(&self) -> BackendResult<Vec<Message>> {
        self.directory.messages_in(&self.room_id).await
    }

    fn user_ids(items: &[Message]) -> BTreeSet<String> {
        items.iter().map(|m| m.sender_id.clone()).collect()
    }
}

/// Publishes into the shared state only while it still shows our room.
struct RoomSink {
    room_id: String,
    tx: watch::Sender<MessageFeedState>,
}

impl FeedSink<Message> for RoomSink {
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut FeedState<MessagesSnapshot>) -> bool,
    {
        self.tx.send_if_modified(|current| match current {
            MessageFeedState::Room { room_id, state } if *room_id == self.room_id => f(state),
            _ => false,
        })
    }
}

pub struct MessageFeed {
    directory: Arc<dyn Directory>,
    viewer: String,
    tx: watch::Sender<MessageFeedState>,
    version: Arc<AtomicU64>,
    handle: Option<FeedHandle>,
}

impl MessageFeed {
    pub fn new(directory: Arc<dyn Directory>, viewer: &str) -> Self {
        let (tx, _) = watch::channel(MessageFeedState::NoRoom);
        Self {
            directory,
            viewer: viewer.to_string(),
            tx,
            version: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    pub fn watch(&self) -> watch::Receiver<MessageFeedState> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> MessageFeedState {
        self.tx.borrow().clone()
    }

    pub fn room_id(&self) -> Option<String> {
        self.tx.borrow().room_id().map(String::from)
    }

    pub fn is_subscribed(&self) -> bool {
        self.handle.as_ref().map_or(false, FeedHandle::is_active)
    }

    /// Follow `room_id`, or nothing with `None`.
    pub async fn select(&mut self, room_id: Option<&str>) {
        self.teardown().await;

        let room_id = match room_id {
            Some(id) => id.to_string(),
            None => {
                self.tx.send_replace(MessageFeedState::NoRoom);
                return;
            }
        };
        self.tx.send_replace(MessageFeedState::Room {
            room_id: room_id.clone(),
            state: FeedState::Idle,
        });

        let source = MessageSource {
            directory: Arc::clone(&self.directory),
            room_id: room_id.clone(),
        };
        let sink = RoomSink {
            room_id: room_id.clone(),
            tx: self.tx.clone(),
        };
        // Names are remembered for as long as this room stays selected.
        let resolver = NameResolver::memoized(Arc::clone(&self.directory));

        match FeedHandle::start(
            source,
            self.directory.as_ref(),
            resolver,
            sink,
            Arc::clone(&self.version),
        )
        .await
        {
            Ok(handle) => {
                tracing::debug!("Following messages of room {}", room_id);
                self.handle = Some(handle);
            }
            Err(e) => {
                tracing::warn!("Could not subscribe to room {}: {}", room_id, e);
                self.tx.send_replace(MessageFeedState::Room {
                    room_id,
                    state: FeedState::Error(e.to_string()),
                });
            }
        }
    }

    /// Stop following and go back to `NoRoom`. Returns false if nothing was followed.
    pub async fn unsubscribe(&mut self) -> bool {
        let torn_down = self.teardown().await;
        self.tx.send_if_modified(|state| {
            if *state == MessageFeedState::NoRoom {
                return false;
            }
            *state = MessageFeedState::NoRoom;
            true
        });
        torn_down
    }

    async fn teardown(&mut self) -> bool {
        match self.handle.take() {
            Some(mut handle) => handle.shutdown().await,
            None => false,
        }
    }

    /// Send a GIF to the selected room and wait until the feed shows it.
    pub async fn send_gif(&self, gif_url: GifUrl) -> Result<Message> {
        let room_id = self.room_id().context("No room selected")?;
        let message = send_gif(self.directory.as_ref(), &self.viewer, &room_id, gif_url).await?;
        if let Some(ref handle) = self.handle {
            handle.refetch().await;
        }
        Ok(message)
    }

    /// Delete one of the viewer's own messages in the selected room.
    pub async fn delete_message(&self, message_id: &str) -> Result<()> {
        let room_id = self.room_id().context("No room selected")?;
        let shown = self
            .tx
            .borrow()
            .snapshot()
            .and_then(|snap| snap.items.iter().find(|m| m.id == message_id).cloned());
        if let Some(message) = shown {
            if message.sender_id != self.viewer {
                bail!("Only the sender can delete a message");
            }
        }
        delete_own_message(self.directory.as_ref(), &self.viewer, &room_id, message_id).await?;
        if let Some(ref handle) = self.handle {
            handle.refetch().await;
        }
        Ok(())
    }
}

/// Create one message carrying `gif_url`. The backend assigns the timestamp.
pub async fn send_gif(
    directory: &dyn Directory,
    viewer: &str,
    room_id: &str,
    gif_url: GifUrl,
) -> Result<Message> {
    let message = NewMessage::new(room_id, viewer, gif_url);
    let created = directory
        .create_message(&message)
        .await
        .with_context(|| format!("Failed to send GIF to room {}", room_id))?;
    tracing::debug!("Sent message {} to room {}", created.id, room_id);
    Ok(created)
}

/// Delete a message after checking the viewer sent it.
pub async fn delete_own_message(
    directory: &dyn Directory,
    viewer: &str,
    room_id: &str,
    message_id: &str,
) -> Result<()> {
    let messages = directory.messages_in(room_id).await?;
    let message = messages
        .iter()
        .find(|m| m.id == message_id)
        .with_context(|| format!("Message {} not found in room {}", message_id, room_id))?;
    if message.sender_id != viewer {
        bail!("Only the sender can delete a message");
    }
    directory.delete_message(room_id, message_id).await?;
    Ok(())
}
