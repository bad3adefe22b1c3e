//! Authenticated HTTP client for the Appwrite REST API
//!
//! Wraps reqwest::Client with project headers and session replay. Appwrite
//! hands non-browser clients their session cookie through the
//! `X-Fallback-Cookies` response header; we store it and send it back.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Deserialize;

use crate::backend::{BackendError, BackendResult};

const FALLBACK_COOKIES: &str = "x-fallback-cookies";
const RESPONSE_FORMAT: &str = "1.5.0";

/// Error body returned by Appwrite on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub struct AppwriteClient {
    http: reqwest::Client,
    endpoint: String,
    project: String,
    session: RwLock<Option<String>>,
}

impl AppwriteClient {
    pub fn new(endpoint: &str, project: &str, session: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project: project.to_string(),
            session: RwLock::new(session),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Current session credential (the fallback cookie JSON).
    pub fn session(&self) -> Option<String> {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_session(&self, session: Option<String>) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = session;
    }

    /// `Cookie` header value built from the stored fallback cookies.
    pub fn cookie_header(&self) -> Option<String> {
        let raw = self.session()?;
        let cookies: HashMap<String, String> = serde_json::from_str(&raw).ok()?;
        let header = cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .header("X-Appwrite-Project", &self.project)
            .header("X-Appwrite-Response-Format", RESPONSE_FORMAT);
        if let Some(session) = self.session() {
            req = req.header("X-Fallback-Cookies", session);
        }
        req
    }

    /// GET with repeated query pairs (`queries[]` may appear several times).
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> BackendResult<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("Appwrite GET {}", url);

        let resp = self
            .request(reqwest::Method::GET, &url)
            .query(query)
            .send()
            .await?;

        self.check_response(resp, &url).await
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> BackendResult<reqwest::Response> {
        self.send_json(reqwest::Method::POST, path, body).await
    }

    pub async fn patch(&self, path: &str, body: &serde_json::Value) -> BackendResult<reqwest::Response> {
        self.send_json(reqwest::Method::PATCH, path, body).await
    }

    pub async fn delete(&self, path: &str) -> BackendResult<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("Appwrite DELETE {}", url);

        let resp = self.request(reqwest::Method::DELETE, &url).send().await?;
        self.check_response(resp, &url).await
    }

    /// POST a multipart form (file uploads).
    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> BackendResult<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("Appwrite POST (multipart) {}", url);

        let resp = self
            .request(reqwest::Method::POST, &url)
            .multipart(form)
            .send()
            .await?;

        self.check_response(resp, &url).await
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> BackendResult<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("Appwrite {} {}", method, url);

        let resp = self.request(method, &url).json(body).send().await?;
        self.check_response(resp, &url).await
    }

    /// Remember the session cookie handed out with a sign-in response.
    pub fn capture_session(&self, resp: &reqwest::Response) -> Option<String> {
        let cookie = resp
            .headers()
            .get(FALLBACK_COOKIES)
            .and_then(|v| v.to_str().ok())
            .map(String::from)?;
        self.set_session(Some(cookie.clone()));
        Some(cookie)
    }

    /// Check HTTP status and map Appwrite error types to `BackendError`.
    async fn check_response(&self, resp: reqwest::Response, url: &str) -> BackendResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let kind = parsed.as_ref().and_then(|e| e.kind.clone()).unwrap_or_default();
        let message = parsed
            .and_then(|e| e.message)
            .unwrap_or_else(|| body.clone());

        tracing::debug!("Appwrite {} for {}: {} ({})", status.as_u16(), url, message, kind);
        Err(classify_error(status.as_u16(), &kind, message, url, self.session().is_some()))
    }
}

fn classify_error(status: u16, kind: &str, message: String, url: &str, has_session: bool) -> BackendError {
    match (status, kind) {
        (_, "user_invalid_credentials") => BackendError::InvalidCredentials,
        (_, k) if k.contains("not_verified") => BackendError::EmailNotVerified,
        (_, "user_already_exists") | (_, "user_email_already_exists") | (409, _) => {
            BackendError::AlreadyExists
        }
        (401, _) if !has_session => BackendError::Unauthorized,
        (401, _) | (403, _) => BackendError::PermissionDenied(message),
        (404, _) => BackendError::NotFound(message),
        (400, _) => BackendError::Invalid(message),
        _ => BackendError::Http {
            status,
            url: url.to_string(),
            body: message,
        },
    }
}
