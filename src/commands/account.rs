//! Account, profile and settings commands

use std::path::Path;

use anyhow::{Context, Result};

use super::{backend_for, format_time, prompt, read_password, Client};
use crate::auth::{self, AuthStatus, SessionStore};
use crate::config::Config;
use crate::models::{ContentFilter, ProfileUpdate, User};
use crate::profile;
use crate::sync::names::UNKNOWN_USER;

fn email_or_prompt(email: Option<String>) -> Result<String> {
    match email {
        Some(e) => Ok(e),
        None => prompt("Email: "),
    }
}

pub async fn login(email: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    let email = email_or_prompt(email)?;
    let password = read_password()?;

    let backend = backend_for(&config);
    let session = auth::sign_in(&backend, &mut config, &email, &password).await?;
    config.save()?;

    println!("Logged in as {}", session.email);
    Ok(())
}

pub async fn signup(email: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    let email = email_or_prompt(email)?;
    let password = read_password()?;

    let backend = backend_for(&config);
    let user = auth::sign_up(&backend, &mut config, &email, &password).await?;
    config.save()?;

    println!("Account created for {}", user.email);
    println!("Set a display name with: vibe-cli profile edit --name <name>");
    Ok(())
}

pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    let backend = backend_for(&config);

    if config.get_session().is_none() {
        println!("Not logged in.");
        return Ok(());
    }
    auth::sign_out(&backend, &mut config).await?;
    config.save()?;
    println!("Logged out.");
    Ok(())
}

pub async fn status() -> Result<()> {
    let config = Config::load()?;
    let backend = backend_for(&config);

    match auth::status(&backend, &config).await? {
        AuthStatus::SignedOut => println!("Session:     none"),
        AuthStatus::Stale(session) => {
            println!("Session:     rejected by server ({})", session.email);
            println!("  Run 'vibe-cli login' to sign in again.");
        }
        AuthStatus::SignedIn(session) => {
            let state = if auth::expires_soon(&session) { "expiring" } else { "valid" };
            println!("Session:     {} ({})", state, session.email);
            if let Some(exp) = session.expires_at {
                println!("  expires_at: {}", format_time(&exp));
            }
        }
    }
    println!("Theme:       {}", config.theme);
    println!("GIF search:  {:?}", config.gif.mode);
    Ok(())
}

fn print_profile(user: &User) {
    let name = if user.display_name.trim().is_empty() {
        UNKNOWN_USER
    } else {
        &user.display_name
    };
    println!("Name:           {}", name);
    println!("Email:          {}", user.email);
    println!("ID:             {}", user.id);
    if !user.bio.is_empty() {
        println!("Bio:            {}", user.bio);
    }
    if let Some(ref url) = user.avatar_url {
        println!("Picture:        {}", url);
    }
    println!(
        "Content filter: {} ({})",
        user.content_filter,
        user.content_filter.describe()
    );
    println!("Member since:   {}", format_time(&user.created_at));
    println!("Last active:    {}", format_time(&user.last_active));
}

pub async fn whoami() -> Result<()> {
    let client = Client::new().await?;
    let user = profile::load(client.backend.as_ref(), client.viewer()).await?;
    print_profile(&user);
    Ok(())
}

pub async fn profile_show(user_id: Option<String>) -> Result<()> {
    let client = Client::new().await?;
    let id = user_id.as_deref().unwrap_or(client.viewer());
    let user = profile::load(client.backend.as_ref(), id).await?;
    print_profile(&user);
    Ok(())
}

pub async fn profile_edit(name: Option<String>, bio: Option<String>) -> Result<()> {
    let client = Client::new().await?;
    let update = ProfileUpdate {
        display_name: name,
        bio,
        ..Default::default()
    };
    let user = profile::edit(client.backend.as_ref(), client.viewer(), client.viewer(), update).await?;
    println!("Profile updated.");
    print_profile(&user);
    Ok(())
}

pub async fn profile_avatar(path: &Path) -> Result<()> {
    let client = Client::new().await?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("avatar.jpg");

    let user = profile::upload_avatar(client.backend.as_ref(), client.viewer(), file_name, bytes).await?;
    println!("Profile picture updated: {}", user.avatar_url.unwrap_or_default());
    Ok(())
}

pub async fn filter(set: Option<String>) -> Result<()> {
    let client = Client::new().await?;

    let current = match set {
        Some(raw) => {
            let level: ContentFilter = raw.parse()?;
            profile::set_content_filter(client.backend.as_ref(), client.viewer(), level)
                .await?
                .content_filter
        }
        None => {
            profile::load(client.backend.as_ref(), client.viewer())
                .await?
                .content_filter
        }
    };

    println!("\nContent filter:");
    println!("{:-<60}", "");
    for level in ContentFilter::ALL {
        let marker = if level == current { "*" } else { " " };
        println!(" {} {:<7} {}", marker, level.as_str(), level.describe());
    }
    Ok(())
}

pub async fn theme(toggle: bool) -> Result<()> {
    let mut config = Config::load()?;
    if toggle {
        config.theme = config.theme.toggled();
        config.save()?;
    }
    println!("Theme: {}", config.theme);
    Ok(())
}
