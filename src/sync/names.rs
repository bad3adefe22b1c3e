//! Display name resolution
//!
//! Turns a set of user ids into a total id → name map. Lookups run
//! concurrently and fail independently: a missing record, a blank name, or a
//! failed fetch all resolve to `UNKNOWN_USER`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::join_all;

use crate::backend::Directory;

/// Placeholder shown when a name cannot be resolved.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Resolved names keyed by user id.
pub type NameMap = BTreeMap<String, String>;

/// Look up a name in a map, falling back to the placeholder.
pub fn name_of<'a>(names: &'a NameMap, user_id: &str) -> &'a str {
    names.get(user_id).map(String::as_str).unwrap_or(UNKNOWN_USER)
}

#[derive(Clone)]
pub struct NameResolver {
    directory: Arc<dyn Directory>,
    /// Successful lookups, never invalidated. `None` disables memoization.
    memo: Option<Arc<Mutex<HashMap<String, String>>>>,
}

impl NameResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            memo: None,
        }
    }

    /// Resolver that remembers names it has already fetched.
    pub fn memoized(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            memo: Some(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub async fn resolve(&self, user_ids: &BTreeSet<String>) -> NameMap {
        let lookups = user_ids.iter().map(|id| async move {
            let name = self.lookup(id).await;
            (id.clone(), name)
        });
        join_all(lookups).await.into_iter().collect()
    }

    async fn lookup(&self, user_id: &str) -> String {
        if let Some(name) = self.remembered(user_id) {
            return name;
        }

        match self.directory.get_user(user_id).await {
            Ok(Some(user)) if !user.display_name.trim().is_empty() => {
                self.remember(user_id, &user.display_name);
                user.display_name
            }
            Ok(_) => UNKNOWN_USER.to_string(),
            Err(e) => {
                tracing::debug!("Name lookup for {} failed: {}", user_id, e);
                UNKNOWN_USER.to_string()
            }
        }
    }

    fn remembered(&self, user_id: &str) -> Option<String> {
        let memo = self.memo.as_ref()?;
        let guard = memo.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(user_id).cloned()
    }

    fn remember(&self, user_id: &str, name: &str) {
        if let Some(ref memo) = self.memo {
            memo.lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(user_id.to_string(), name.to_string());
        }
    }
}
