//! Account API: email/password sessions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::AppwriteBackend;
use crate::backend::{Account, BackendError, BackendResult, Session};

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "userId")]
    user_id: String,
    expire: Option<DateTime<Utc>>,
    #[serde(rename = "providerUid")]
    provider_uid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(rename = "$id")]
    id: String,
}

impl AppwriteBackend {
    fn session_from(&self, resp: SessionResponse, email: &str) -> BackendResult<Session> {
        let secret = self
            .client
            .session()
            .ok_or_else(|| BackendError::Invalid("server did not return a session cookie".into()))?;
        Ok(Session {
            user_id: resp.user_id,
            email: resp.provider_uid.unwrap_or_else(|| email.to_string()),
            secret,
            expires_at: resp.expire,
        })
    }
}

#[async_trait]
impl Account for AppwriteBackend {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        // Start from a clean slate; a stale cookie would make this a 401.
        self.client.set_session(None);
        let body = json!({ "email": email, "password": password });
        let resp = self.client.post("/account/sessions/email", &body).await?;
        self.client.capture_session(&resp);
        let session: SessionResponse = resp.json().await?;
        tracing::debug!("Session opened for {}", session.user_id);
        self.session_from(session, email)
    }

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Session> {
        self.client.set_session(None);
        let body = json!({
            "userId": "unique()",
            "email": email,
            "password": password,
        });
        let resp = self.client.post("/account", &body).await?;
        let account: AccountResponse = resp.json().await?;
        tracing::info!("Created account {}", account.id);
        self.sign_in(email, password).await
    }

    async fn current(&self) -> BackendResult<Option<String>> {
        if self.client.session().is_none() {
            return Ok(None);
        }
        match self.client.get("/account", &[]).await {
            Ok(resp) => {
                let account: AccountResponse = resp.json().await?;
                Ok(Some(account.id))
            }
            Err(BackendError::Unauthorized) | Err(BackendError::PermissionDenied(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self) -> BackendResult<Session> {
        let resp = self
            .client
            .patch("/account/sessions/current", &json!({}))
            .await?;
        let session: SessionResponse = resp.json().await?;
        self.session_from(session, "")
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let result = self.client.delete("/account/sessions/current").await;
        self.client.set_session(None);
        result.map(|_| ())
    }
}
