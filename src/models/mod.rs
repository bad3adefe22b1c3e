//! Data models for chat entities

mod gif;
mod message;
mod room;
mod user;

pub use gif::*;
pub use message::*;
pub use room::*;
pub use user::*;

/// Validation failures when constructing model values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("a message needs a GIF URL")]
    MissingGifUrl,
    #[error("invalid GIF URL {0}")]
    InvalidGifUrl(String),
    #[error("room name must not be empty")]
    EmptyRoomName,
    #[error("a room needs at least one other participant")]
    NoParticipants,
    #[error("unknown content filter '{0}' (use off, low, medium, high)")]
    UnknownContentFilter(String),
}
