//! Realtime feeds: subscribe, refetch on change, resolve names, publish.
//!
//! A feed runs as a background task that owns the backend change stream and
//! a command channel. Every refresh (triggered by a change notification or by
//! an explicit refetch after a write) fetches the full query, resolves the
//! display names of everyone it mentions, and publishes a versioned
//! `Snapshot` through a `tokio::sync::watch` channel.
//!
//! Refreshes run one at a time inside the task and carry increasing
//! versions, so a slow name resolution can never overwrite a newer snapshot.
//! A snapshot equal in content to the published one is not republished.

pub mod messages;
pub mod names;
pub mod rooms;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backend::{BackendResult, ChangeStream, Directory, Topic};
use names::{NameMap, NameResolver};

/// Published state of a feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedState<V> {
    /// Nothing published yet.
    Idle,
    Subscribed(V),
    /// The subscription failed. No automatic retry.
    Error(String),
}

impl<V> FeedState<V> {
    pub fn snapshot(&self) -> Option<&V> {
        match self {
            FeedState::Subscribed(v) => Some(v),
            _ => None,
        }
    }
}

/// Records plus the names of every user they mention.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub version: u64,
    pub items: Vec<T>,
    pub names: NameMap,
}

/// What a feed watches and how it reloads.
#[async_trait]
pub trait FeedSource: Send + Sync + 'static {
    type Item: Clone + PartialEq + Send + Sync + 'static;

    fn topic(&self) -> Topic;
    async fn fetch(&self) -> BackendResult<Vec<Self::Item>>;
    /// Users whose names the snapshot needs.
    fn user_ids(items: &[Self::Item]) -> BTreeSet<String>;
}

/// Where a feed task publishes.
pub trait FeedSink<T>: Send + Sync + 'static {
    /// Apply `f` to the published state; subscribers are woken if it returns true.
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut FeedState<Snapshot<T>>) -> bool;
}

impl<T: Send + Sync + 'static> FeedSink<T> for watch::Sender<FeedState<Snapshot<T>>> {
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut FeedState<Snapshot<T>>) -> bool,
    {
        self.send_if_modified(f)
    }
}

enum FeedCommand {
    Refetch { done: oneshot::Sender<()> },
}

/// Handle on a running feed task.
///
/// Cancelling is idempotent; dropping the handle cancels the task, which drops
/// the change stream and ends the backend subscription.
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Subscribe to the source's topic and start the feed task.
    pub async fn start<S, K>(
        source: S,
        directory: &dyn Directory,
        resolver: NameResolver,
        sink: K,
        version: Arc<AtomicU64>,
    ) -> BackendResult<Self>
    where
        S: FeedSource,
        K: FeedSink<S::Item>,
    {
        let changes = directory.subscribe(source.topic()).await?;
        let (commands, command_rx) = mpsc::unbounded_channel();

        let feed = Feed {
            source,
            resolver,
            sink,
            version,
        };
        let task = tokio::spawn(feed.run(changes, command_rx));

        Ok(Self {
            commands,
            task: Some(task),
        })
    }

    /// Ask the task to refetch now and wait until the result is published.
    ///
    /// Returns false if the feed is no longer running.
    pub async fn refetch(&self) -> bool {
        let (done, wait) = oneshot::channel();
        if self.commands.send(FeedCommand::Refetch { done }).is_err() {
            return false;
        }
        wait.await.is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Abort the task. Returns true only for the call that tore it down.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Abort the task and wait until it (and its subscription) is gone.
    pub async fn shutdown(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                let _ = task.await;
                true
            }
            None => false,
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Feed<S, K> {
    source: S,
    resolver: NameResolver,
    sink: K,
    version: Arc<AtomicU64>,
}

impl<S, K> Feed<S, K>
where
    S: FeedSource,
    K: FeedSink<S::Item>,
{
    async fn run(self, mut changes: ChangeStream, mut commands: mpsc::UnboundedReceiver<FeedCommand>) {
        let topic = self.source.topic();
        if !self.refresh().await {
            return;
        }

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Some(Ok(change)) => {
                        tracing::debug!("{:?}: {:?} {}", topic, change.kind, change.document_id);
                        if !self.refresh().await {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Subscription to {:?} failed: {}", topic, e);
                        self.fail(e.to_string());
                        return;
                    }
                    None => {
                        tracing::warn!("Subscription to {:?} closed by backend", topic);
                        self.fail("subscription closed".to_string());
                        return;
                    }
                },
                command = commands.recv() => match command {
                    Some(FeedCommand::Refetch { done }) => {
                        let running = self.refresh().await;
                        let _ = done.send(());
                        if !running {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }

    fn fail(&self, reason: String) {
        self.sink.update(|state| {
            *state = FeedState::Error(reason);
            true
        });
    }

    /// Fetch, resolve and publish. Returns false once the feed has failed
    /// for good: a fetch error before anything was published.
    async fn refresh(&self) -> bool {
        let items = match self.source.fetch().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Refetch for {:?} failed: {}", self.source.topic(), e);
                // Keep a stale list rather than blanking it.
                let failed = self.sink.update(|state| {
                    if matches!(state, FeedState::Subscribed(_)) {
                        return false;
                    }
                    *state = FeedState::Error(e.to_string());
                    true
                });
                return !failed;
            }
        };

        let names = self.resolver.resolve(&S::user_ids(&items)).await;
        let next = Snapshot {
            version: self.version.fetch_add(1, Ordering::SeqCst) + 1,
            items,
            names,
        };
        publish(&self.sink, next);
        true
    }
}

/// Publish `next` unless a newer snapshot is already out or nothing changed.
fn publish<T, K>(sink: &K, next: Snapshot<T>) -> bool
where
    T: PartialEq,
    K: FeedSink<T>,
{
    sink.update(|state| {
        if let FeedState::Subscribed(current) = state {
            if current.version >= next.version {
                return false;
            }
            if current.items == next.items && current.names == next.names {
                current.version = next.version;
                return false;
            }
        }
        *state = FeedState::Subscribed(next);
        true
    })
}
