//! CLI command implementations (print to stdout)

mod account;
mod chat;
mod gifs;

pub use account::{filter, login, logout, profile_avatar, profile_edit, profile_show, signup, status, theme, whoami};
pub use chat::{list_rooms, read_room, room_add, room_create, room_delete, room_remove, room_rename, search_users, send, unsend};
pub use gifs::{list_gifs, relay};

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth;
use crate::backend::appwrite::AppwriteBackend;
use crate::backend::{Directory, Session};
use crate::config::Config;

/// Signed-in backend handle. Refreshes the stored session if it is about to expire.
pub struct Client {
    pub config: Config,
    pub backend: Arc<AppwriteBackend>,
    pub session: Session,
}

impl Client {
    pub async fn new() -> Result<Self> {
        let mut config = Config::load()?;
        let backend = Arc::new(backend_for(&config));

        let before = config.session.clone();
        let session = auth::restore(backend.as_ref(), &mut config).await?;
        if before.as_ref() != Some(&session) {
            config.save()?;
            tracing::info!("Session refreshed");
        }

        Ok(Self {
            config,
            backend,
            session,
        })
    }

    pub fn viewer(&self) -> &str {
        &self.session.user_id
    }

    pub fn directory(&self) -> Arc<dyn Directory> {
        self.backend.clone()
    }
}

/// Backend carrying the stored session, if any, without checking it.
fn backend_for(config: &Config) -> AppwriteBackend {
    let secret = config.session.as_ref().map(|s| s.secret.clone());
    AppwriteBackend::new(config.appwrite.clone(), secret)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Password from `VIBE_PASSWORD` or an interactive prompt.
fn read_password() -> Result<String> {
    match std::env::var("VIBE_PASSWORD") {
        Ok(p) if !p.is_empty() => Ok(p),
        _ => prompt("Password: "),
    }
}

fn format_time(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string()
}
