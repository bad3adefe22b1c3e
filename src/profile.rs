//! Profile editing and avatar upload
//!
//! Users may only edit their own profile. The backend enforces this too; the
//! check here just fails before a round-trip.

use anyhow::{bail, Context, Result};

use crate::backend::{BlobStore, Directory};
use crate::models::{ContentFilter, ProfileUpdate, User};

const AVATAR_CONTENT_TYPE: &str = "image/jpeg";

pub async fn load(directory: &dyn Directory, user_id: &str) -> Result<User> {
    directory
        .get_user(user_id)
        .await?
        .with_context(|| format!("No profile found for {}", user_id))
}

/// Apply `update` to `user_id`'s profile as `viewer`.
pub async fn edit(directory: &dyn Directory, viewer: &str, user_id: &str, mut update: ProfileUpdate) -> Result<User> {
    if viewer != user_id {
        bail!("You can only edit your own profile");
    }
    if let Some(ref mut name) = update.display_name {
        *name = name.trim().to_string();
    }
    if update.is_empty() {
        bail!("Nothing to change");
    }
    let user = directory
        .update_user(user_id, &update)
        .await
        .context("Failed to update profile")?;
    tracing::debug!("Updated profile of {}", user_id);
    Ok(user)
}

pub async fn set_content_filter(directory: &dyn Directory, viewer: &str, filter: ContentFilter) -> Result<User> {
    let update = ProfileUpdate {
        content_filter: Some(filter),
        ..Default::default()
    };
    edit(directory, viewer, viewer, update).await
}

/// Upload a new profile picture and point the profile at it.
///
/// The previous picture is deleted afterwards; failing to delete it only logs.
pub async fn upload_avatar<B>(backend: &B, viewer: &str, file_name: &str, bytes: Vec<u8>) -> Result<User>
where
    B: Directory + BlobStore + ?Sized,
{
    if bytes.is_empty() {
        bail!("Image file is empty");
    }
    let current = backend
        .get_user(viewer)
        .await?
        .with_context(|| format!("No profile found for {}", viewer))?;

    let file_id = backend
        .upload(file_name, bytes, AVATAR_CONTENT_TYPE)
        .await
        .context("Failed to upload profile picture")?;
    let update = ProfileUpdate {
        avatar_url: Some(backend.preview_url(&file_id)),
        ..Default::default()
    };
    let user = backend
        .update_user(viewer, &update)
        .await
        .context("Uploaded picture but could not save it to the profile")?;

    let old_id = current
        .avatar_url
        .as_deref()
        .and_then(|url| backend.file_id_from_url(url))
        .filter(|id| *id != file_id);
    if let Some(old_id) = old_id {
        if let Err(e) = backend.delete(&old_id).await {
            tracing::warn!("Could not delete previous picture {}: {}", old_id, e);
        }
    }
    Ok(user)
}
