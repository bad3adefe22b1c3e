//! V!be CLI - terminal client for the GIF-only chat
//!
//! Every message is a GIF: search one, send it, watch rooms update live.

mod auth;
mod backend;
mod commands;
mod config;
mod gif;
mod models;
mod profile;
mod sync;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "vibe-cli")]
#[command(about = "Terminal client for V!be, the chat where every message is a GIF", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password (password from VIBE_PASSWORD or prompt)
    Login {
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Create an account
    Signup {
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show current authentication status
    Status,

    /// Show your profile (verify auth works)
    Whoami,

    /// Show or edit profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Show or set your GIF content filter (off, low, medium, high)
    Filter {
        #[arg(short, long)]
        set: Option<String>,
    },

    /// Show or toggle the light/dark theme
    Theme {
        #[arg(short, long)]
        toggle: bool,
    },

    /// Find users by display name prefix
    Users { prefix: String },

    /// List your chat rooms
    Rooms {
        /// Keep running and print the list on every change
        #[arg(short, long)]
        watch: bool,
    },

    /// Create and manage rooms
    Room {
        #[command(subcommand)]
        action: RoomAction,
    },

    /// Read messages from a room
    Read {
        /// Room ID (from `rooms` output)
        room_id: String,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Keep running and print new messages as they arrive
        #[arg(short, long)]
        watch: bool,
    },

    /// Send a GIF
    Send {
        /// Room ID (from `rooms` output)
        #[arg(short, long)]
        to: String,

        /// GIF URL to send
        gif_url: Option<String>,

        /// Search for a GIF instead of giving a URL
        #[arg(short, long, conflicts_with = "gif_url")]
        search: Option<String>,

        /// Which search result to send (1 = first)
        #[arg(short, long, default_value = "1")]
        pick: usize,
    },

    /// Delete one of your messages
    Unsend { room_id: String, message_id: String },

    /// Search GIFs (trending without a query)
    Gifs {
        query: Option<String>,

        /// Number of result pages to load
        #[arg(short, long, default_value = "1")]
        pages: usize,
    },

    /// Run the GIF relay service (needs KLIPY_API_KEY)
    Relay {
        #[arg(short, long, default_value = "127.0.0.1:8787")]
        bind: SocketAddr,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show a profile (yours by default)
    Show { user_id: Option<String> },
    /// Change your display name or bio
    Edit {
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        bio: Option<String>,
    },
    /// Upload a JPEG as your profile picture
    Avatar { path: PathBuf },
}

#[derive(Subcommand)]
enum RoomAction {
    /// Create a room with one or more other users
    Create {
        name: String,
        /// User IDs to add (from `users` output)
        #[arg(short, long, required = true, num_args = 1..)]
        with: Vec<String>,
    },
    Rename { room_id: String, name: String },
    Add { room_id: String, user_id: String },
    Remove { room_id: String, user_id: String },
    Delete { room_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login { email } => {
            commands::login(email).await?;
        }
        Commands::Signup { email } => {
            commands::signup(email).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            commands::logout().await?;
        }
        Commands::Status => {
            commands::status().await?;
        }
        Commands::Whoami => {
            commands::whoami().await?;
        }
        Commands::Profile { action } => match action {
            ProfileAction::Show { user_id } => commands::profile_show(user_id).await?,
            ProfileAction::Edit { name, bio } => commands::profile_edit(name, bio).await?,
            ProfileAction::Avatar { path } => {
                tracing::info!("Uploading {}...", path.display());
                commands::profile_avatar(&path).await?;
            }
        },
        Commands::Filter { set } => {
            commands::filter(set).await?;
        }
        Commands::Theme { toggle } => {
            commands::theme(toggle).await?;
        }
        Commands::Users { prefix } => {
            commands::search_users(&prefix).await?;
        }
        Commands::Rooms { watch } => {
            commands::list_rooms(watch).await?;
        }
        Commands::Room { action } => match action {
            RoomAction::Create { name, with } => commands::room_create(&name, &with).await?,
            RoomAction::Rename { room_id, name } => commands::room_rename(&room_id, &name).await?,
            RoomAction::Add { room_id, user_id } => commands::room_add(&room_id, &user_id).await?,
            RoomAction::Remove { room_id, user_id } => {
                commands::room_remove(&room_id, &user_id).await?
            }
            RoomAction::Delete { room_id } => commands::room_delete(&room_id).await?,
        },
        Commands::Read {
            room_id,
            limit,
            watch,
        } => {
            commands::read_room(&room_id, limit, watch).await?;
        }
        Commands::Send {
            to,
            gif_url,
            search,
            pick,
        } => {
            tracing::info!("Sending GIF...");
            commands::send(&to, gif_url, search, pick).await?;
        }
        Commands::Unsend {
            room_id,
            message_id,
        } => {
            commands::unsend(&room_id, &message_id).await?;
        }
        Commands::Gifs { query, pages } => {
            commands::list_gifs(query, pages).await?;
        }
        Commands::Relay { bind } => {
            commands::relay(bind).await?;
        }
    }

    Ok(())
}
