//! Authentication
//!
//! Email/password sign-in and sign-up against the backend account service.
//! Sign-up also writes the user's profile record. The session is kept in a
//! `SessionStore` (the config file) and refreshed when it is about to expire.

pub mod session;

pub use session::{expires_soon, SessionStore};

use anyhow::{bail, Context, Result};

use crate::backend::{Account, Directory, Session};
use crate::models::{NewProfile, User};

/// What `status` found.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStatus {
    SignedOut,
    /// A session is stored but the backend no longer accepts it.
    Stale(Session),
    SignedIn(Session),
}

fn check_credentials(email: &str, password: &str) -> Result<()> {
    if email.trim().is_empty() || password.is_empty() {
        bail!("Email and password are required");
    }
    Ok(())
}

pub async fn sign_in<B, S>(backend: &B, store: &mut S, email: &str, password: &str) -> Result<Session>
where
    B: Account + Directory + ?Sized,
    S: SessionStore + ?Sized,
{
    check_credentials(email, password)?;
    let session = backend.sign_in(email.trim(), password).await?;

    if let Err(e) = backend.touch_last_active(&session.user_id).await {
        tracing::warn!("Could not update last activity: {}", e);
    }
    store.set_session(session.clone());
    tracing::info!("Signed in as {}", session.email);
    Ok(session)
}

/// Create the account, open a session and write the initial profile record.
pub async fn sign_up<B, S>(backend: &B, store: &mut S, email: &str, password: &str) -> Result<User>
where
    B: Account + Directory + ?Sized,
    S: SessionStore + ?Sized,
{
    check_credentials(email, password)?;
    let email = email.trim();
    let session = backend.sign_up(email, password).await?;
    store.set_session(session.clone());

    let profile = NewProfile::for_sign_up(&session.user_id, email);
    let user = backend
        .create_user(&profile)
        .await
        .context("Account created but the profile could not be saved")?;
    tracing::info!("Created account {} ({})", email, user.id);
    Ok(user)
}

/// Record last activity, end the session and forget it locally.
pub async fn sign_out<B, S>(backend: &B, store: &mut S) -> Result<()>
where
    B: Account + Directory + ?Sized,
    S: SessionStore + ?Sized,
{
    let session = match store.get_session() {
        Some(s) => s,
        None => {
            tracing::debug!("No stored session to sign out");
            return Ok(());
        }
    };

    if let Err(e) = backend.touch_last_active(&session.user_id).await {
        tracing::debug!("Could not update last activity: {}", e);
    }
    if let Err(e) = backend.sign_out().await {
        tracing::warn!("Server-side sign-out failed: {}", e);
    }
    store.clear_session();
    Ok(())
}

pub async fn status<B, S>(backend: &B, store: &S) -> Result<AuthStatus>
where
    B: Account + ?Sized,
    S: SessionStore + ?Sized,
{
    let session = match store.get_session() {
        Some(s) => s,
        None => return Ok(AuthStatus::SignedOut),
    };
    match backend.current().await? {
        Some(user_id) if user_id == session.user_id => Ok(AuthStatus::SignedIn(session)),
        _ => Ok(AuthStatus::Stale(session)),
    }
}

/// The stored session, refreshed first if it expires within five minutes.
pub async fn restore<B, S>(backend: &B, store: &mut S) -> Result<Session>
where
    B: Account + ?Sized,
    S: SessionStore + ?Sized,
{
    let session = store
        .get_session()
        .context("Not logged in. Run 'vibe-cli login' first.")?;
    if !expires_soon(&session) {
        return Ok(session);
    }

    tracing::info!("Session expiring, refreshing...");
    match backend.refresh().await {
        Ok(fresh) => {
            store.set_session(fresh.clone());
            Ok(fresh)
        }
        Err(e) => bail!("Session refresh failed: {}. Run 'vibe-cli login'.", e),
    }
}
