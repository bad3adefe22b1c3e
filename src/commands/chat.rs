//! Room and message commands

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use super::{format_time, Client};
use crate::backend::Directory;
use crate::gif::{self, pager::GifPager};
use crate::models::{ChatRoom, GifUrl, Message};
use crate::sync::messages::{MessageFeed, MessageFeedState, MessagesSnapshot};
use crate::sync::names::{name_of, NameMap, NameResolver};
use crate::sync::rooms::{self, other_participant_names, RoomFeed, RoomSource, RoomsSnapshot};
use crate::sync::{FeedSource, FeedState};

pub async fn search_users(prefix: &str) -> Result<()> {
    let client = Client::new().await?;
    let users = rooms::find_users(client.backend.as_ref(), client.viewer(), prefix).await?;

    if users.is_empty() {
        println!("(no users found)");
        return Ok(());
    }
    for user in &users {
        println!("{}", user.display_name);
        println!("  ID: {}", user.id);
    }
    Ok(())
}

fn print_room(room: &ChatRoom, names: &NameMap, viewer: &str) {
    println!("{}", room.display_name());
    println!("  ID: {}", room.id);
    let others = other_participant_names(room, names, viewer);
    if others.is_empty() {
        println!("  With: (nobody else)");
    } else {
        println!("  With: {}", others.join(", "));
    }
    println!("  Created: {} by {}", format_time(&room.created_at), name_of(names, &room.created_by));
}

fn print_rooms(snap: &RoomsSnapshot, viewer: &str) {
    println!("\nChat Rooms:");
    println!("{:-<60}", "");
    if snap.items.is_empty() {
        println!("  (no rooms yet)");
        return;
    }
    for room in &snap.items {
        print_room(room, &snap.names, viewer);
        println!();
    }
}

/// Wait for Ctrl-C or the end of `updates`, printing each published state.
async fn follow<T, F>(mut updates: WatchStream<T>, mut print: F) -> Result<()>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T) -> Result<bool>,
{
    loop {
        tokio::select! {
            next = updates.next() => match next {
                Some(state) => {
                    if !print(state)? {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        }
    }
}

pub async fn list_rooms(watch: bool) -> Result<()> {
    let client = Client::new().await?;
    let viewer = client.viewer().to_string();

    if !watch {
        let rooms = client.backend.rooms_for(&viewer).await?;
        let names = NameResolver::new(client.directory())
            .resolve(&RoomSource::user_ids(&rooms))
            .await;
        print_rooms(
            &RoomsSnapshot {
                version: 1,
                items: rooms,
                names,
            },
            &viewer,
        );
        return Ok(());
    }

    let mut feed = RoomFeed::new(client.directory(), &viewer);
    let updates = WatchStream::new(feed.watch());
    feed.subscribe().await;
    tracing::info!("Watching rooms, press Ctrl-C to stop");

    let result = follow(updates, |state| match state {
        FeedState::Idle => Ok(true),
        FeedState::Subscribed(snap) => {
            print_rooms(&snap, &viewer);
            Ok(true)
        }
        FeedState::Error(e) => bail!("Room subscription failed: {}", e),
    })
    .await;
    feed.unsubscribe().await;
    result
}

async fn member_names(client: &Client, room: &ChatRoom) -> NameMap {
    let ids = room.participants.iter().cloned().collect();
    NameResolver::new(client.directory()).resolve(&ids).await
}

pub async fn room_create(name: &str, with: &[String]) -> Result<()> {
    let client = Client::new().await?;
    let room = rooms::create_room(client.backend.as_ref(), client.viewer(), name, with).await?;
    println!("Room created.");
    print_room(&room, &member_names(&client, &room).await, client.viewer());
    Ok(())
}

pub async fn room_rename(room_id: &str, name: &str) -> Result<()> {
    let client = Client::new().await?;
    let room = rooms::rename_room(client.backend.as_ref(), client.viewer(), room_id, name).await?;
    println!("Room renamed to {}", room.display_name());
    Ok(())
}

pub async fn room_add(room_id: &str, user_id: &str) -> Result<()> {
    let client = Client::new().await?;
    let room = rooms::add_participant(client.backend.as_ref(), client.viewer(), room_id, user_id).await?;
    print_room(&room, &member_names(&client, &room).await, client.viewer());
    Ok(())
}

pub async fn room_remove(room_id: &str, user_id: &str) -> Result<()> {
    let client = Client::new().await?;
    let room = rooms::remove_participant(client.backend.as_ref(), client.viewer(), room_id, user_id).await?;
    print_room(&room, &member_names(&client, &room).await, client.viewer());
    Ok(())
}

pub async fn room_delete(room_id: &str) -> Result<()> {
    let client = Client::new().await?;
    rooms::delete_room(client.backend.as_ref(), client.viewer(), room_id).await?;
    println!("Room deleted.");
    Ok(())
}

fn print_message(msg: &Message, names: &NameMap, viewer: &str) {
    let sender = if msg.sender_id == viewer {
        "You"
    } else {
        name_of(names, &msg.sender_id)
    };
    println!("[{}] {}: {}", format_time(&msg.timestamp), sender, msg.gif_url);
    println!("  ID: {}", msg.id);
}

/// Print the last `limit` messages of `snap`.
fn print_recent(snap: &MessagesSnapshot, limit: usize, viewer: &str) {
    if snap.items.is_empty() {
        println!("(no messages)");
        return;
    }
    let skip = snap.items.len().saturating_sub(limit);
    for msg in &snap.items[skip..] {
        print_message(msg, &snap.names, viewer);
    }
}

/// Messages not printed yet, plus how many printed ones have disappeared.
/// `shown` is updated to match `items`.
fn unseen<'a>(items: &'a [Message], shown: &mut HashSet<String>) -> (Vec<&'a Message>, usize) {
    let present: HashSet<&str> = items.iter().map(|m| m.id.as_str()).collect();
    let before = shown.len();
    shown.retain(|id| present.contains(id.as_str()));
    let removed = before - shown.len();

    let new = items.iter().filter(|m| shown.insert(m.id.clone())).collect();
    (new, removed)
}

pub async fn read_room(room_id: &str, limit: usize, watch: bool) -> Result<()> {
    let client = Client::new().await?;
    let viewer = client.viewer().to_string();

    let room = client
        .backend
        .get_room(room_id)
        .await?
        .with_context(|| format!("Room {} not found", room_id))?;
    println!("{}", room.display_name());
    println!("{:-<60}", "");

    let mut feed = MessageFeed::new(client.directory(), &viewer);
    let updates = WatchStream::new(feed.watch());
    feed.select(Some(room_id)).await;

    let mut shown: Option<HashSet<String>> = None;
    let result = follow(updates, |state| match state {
        MessageFeedState::NoRoom => Ok(false),
        MessageFeedState::Room { state, .. } => match state {
            FeedState::Idle => Ok(true),
            FeedState::Error(e) => bail!("Message subscription failed: {}", e),
            FeedState::Subscribed(snap) => {
                let Some(ref mut shown) = shown else {
                    print_recent(&snap, limit, &viewer);
                    shown = Some(snap.items.iter().map(|m| m.id.clone()).collect());
                    return Ok(watch);
                };
                let (new, removed) = unseen(&snap.items, shown);
                if removed > 0 {
                    println!("({} message(s) deleted)", removed);
                }
                for msg in new {
                    print_message(msg, &snap.names, &viewer);
                }
                Ok(true)
            }
        },
    })
    .await;
    feed.unsubscribe().await;
    result
}

async fn pick_gif(client: &Client, query: &str, pick: usize) -> Result<GifUrl> {
    let provider = gif::provider_from_settings(&client.config.gif, client.viewer())?;
    let mut pager = GifPager::new(provider, client.directory(), client.viewer());
    pager.submit(query).await?;

    let index = pick.checked_sub(1).context("--pick starts at 1")?;
    let chosen = pager
        .results()
        .get(index)
        .with_context(|| format!("Only {} GIFs found for {:?}", pager.results().len(), query))?;
    tracing::info!("Picked {} ({})", chosen.title.as_deref().unwrap_or("untitled"), chosen.id);
    Ok(GifUrl::parse(&chosen.url)?)
}

/// Messages shown after a send or unsend.
const RECENT_AFTER_WRITE: usize = 5;

/// The room as the feed shows it once the write has been refetched.
fn print_reconciled(feed: &MessageFeed, viewer: &str) {
    if !feed.is_subscribed() {
        tracing::warn!("Room feed is not running; the list below may be out of date");
    }
    if let Some(snap) = feed.state().snapshot() {
        println!("{:-<60}", "");
        print_recent(snap, RECENT_AFTER_WRITE, viewer);
    }
}

pub async fn send(to: &str, gif_url: Option<String>, search: Option<String>, pick: usize) -> Result<()> {
    let client = Client::new().await?;
    let url = match (gif_url, search) {
        (Some(url), None) => GifUrl::parse(&url)?,
        (None, Some(query)) => pick_gif(&client, &query, pick).await?,
        _ => bail!("Give either a GIF URL or --search <query>"),
    };

    let mut feed = MessageFeed::new(client.directory(), client.viewer());
    feed.select(Some(to)).await;
    let sent = feed.send_gif(url).await;
    if let Ok(ref msg) = sent {
        println!("Sent {}", msg.gif_url);
        println!("  ID: {}", msg.id);
        print_reconciled(&feed, client.viewer());
    }
    feed.unsubscribe().await;
    sent.map(|_| ())
}

pub async fn unsend(room_id: &str, message_id: &str) -> Result<()> {
    let client = Client::new().await?;
    let mut feed = MessageFeed::new(client.directory(), client.viewer());
    feed.select(Some(room_id)).await;
    let deleted = feed.delete_message(message_id).await;
    if deleted.is_ok() {
        println!("Message deleted.");
        print_reconciled(&feed, client.viewer());
    }
    feed.unsubscribe().await;
    deleted
}
