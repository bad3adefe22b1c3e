//! Chat room models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Chat room entity. Participants always include the creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    pub name: String,
    pub participants: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// Participants other than the viewer, in stored order.
    pub fn other_participants<'a>(&'a self, viewer: &'a str) -> impl Iterator<Item = &'a str> {
        self.participants
            .iter()
            .map(String::as_str)
            .filter(move |p| *p != viewer)
    }

    /// Display name, with a placeholder for rooms saved without one.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "Unnamed Chat"
        } else {
            &self.name
        }
    }
}

/// A room about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRoom {
    pub name: String,
    pub participants: Vec<String>,
    pub created_by: String,
}

impl NewRoom {
    /// Build a room with the creator first and duplicates removed.
    pub fn new<I, S>(name: &str, creator: &str, others: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(ModelError::EmptyRoomName);
        }

        let participants = normalize_participants(creator, others);
        if participants.len() < 2 {
            return Err(ModelError::NoParticipants);
        }

        Ok(Self {
            name: name.to_string(),
            participants,
            created_by: creator.to_string(),
        })
    }
}

/// Rename or re-membership of an existing room.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUpdate {
    #[serde(rename = "chatName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
}

impl RoomUpdate {
    pub fn rename(name: &str) -> Result<Self, ModelError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ModelError::EmptyRoomName);
        }
        Ok(Self {
            name: Some(name.to_string()),
            participants: None,
        })
    }

    /// Membership change that keeps the creator in the set.
    pub fn with_participants(room: &ChatRoom, participants: Vec<String>) -> Self {
        Self {
            name: None,
            participants: Some(normalize_participants(&room.created_by, participants)),
        }
    }

    pub fn apply_to(&self, room: &mut ChatRoom) {
        if let Some(ref name) = self.name {
            room.name = name.clone();
        }
        if let Some(ref participants) = self.participants {
            room.participants = participants.clone();
        }
    }
}

fn normalize_participants<I, S>(creator: &str, others: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut participants = vec![creator.to_string()];
    for id in others {
        let id = id.into();
        if !id.is_empty() && !participants.contains(&id) {
            participants.push(id);
        }
    }
    participants
}
