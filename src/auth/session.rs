//! Session storage and expiry

use chrono::{DateTime, Duration, Utc};

use crate::backend::Session;

/// Sessions closer than this to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Session store trait for different storage backends
pub trait SessionStore {
    fn get_session(&self) -> Option<Session>;
    fn set_session(&mut self, session: Session);
    fn clear_session(&mut self);
}

/// True if the session has less than five minutes left.
pub fn expires_soon(session: &Session) -> bool {
    expires_soon_at(session, Utc::now())
}

fn expires_soon_at(session: &Session, now: DateTime<Utc>) -> bool {
    match session.expires_at {
        Some(exp) => now + Duration::seconds(EXPIRY_MARGIN_SECS) >= exp,
        None => false,
    }
}
