//! Bearer-token session context shared by every remote collection.
//!
//! The token itself is owned by whoever logs in; clients only read it before
//! each request. Changes are broadcast so open views can re-check access.
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AuthSession {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl AuthSession {
    pub fn anonymous() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::anonymous();
        session.set_token(token);
        session
    }

    pub fn current_token(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        let token = Some(token).filter(|t| !t.trim().is_empty());
        self.tx.send_replace(token);
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Receiver notified whenever the token is set or cleared.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

/// File-backed persistence for the token between CLI invocations.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> std::io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw.trim().to_string()).filter(|t| !t.is_empty())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn save(&self, token: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)
    }

    pub fn remove(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Session seeded with the stored token, if any.
    pub fn session(&self) -> std::io::Result<AuthSession> {
        let session = AuthSession::anonymous();
        if let Some(token) = self.load()? {
            session.set_token(token);
        }
        Ok(session)
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
    message: Option<String>,
}

/// Exchange admin credentials for a bearer token.
pub async fn login(
    http: &Client,
    base_url: &Url,
    email: &str,
    password: &str,
) -> Result<String, ApiError> {
    let endpoint = base_url
        .join("auth/admin/login")
        .map_err(|e| ApiError::Network(format!("invalid base URL: {}", e)))?;
    info!(url = %endpoint, email, "logging in");
    let res = http
        .post(endpoint)
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await?;

    let status = res.status();
    let body = res.text().await?;
    let parsed: Option<LoginResponse> = serde_json::from_str(&body).ok();
    if !status.is_success() {
        let message = parsed
            .and_then(|p| p.message)
            .unwrap_or_else(|| "Login failed. Please check your credentials.".to_string());
        warn!(%status, "login rejected");
        return Err(ApiError::Server {
            status: status.as_u16(),
            message,
        });
    }

    parsed
        .and_then(|p| p.token)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::Decode("token not received".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn blank_token_counts_as_logged_out() {
        let session = AuthSession::with_token("   ");
        assert!(!session.is_authenticated());
        session.set_token("abc");
        assert_eq!(session.current_token().as_deref(), Some("abc"));
        session.clear();
        assert_eq!(session.current_token(), None);
    }

    #[tokio::test]
    async fn subscribers_see_logout() {
        let session = AuthSession::with_token("abc");
        let mut rx = session.subscribe();
        session.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }

    #[test]
    fn clones_share_the_same_token() {
        let session = AuthSession::anonymous();
        let other = session.clone();
        session.set_token("shared");
        assert_eq!(other.current_token().as_deref(), Some("shared"));
    }

    #[test]
    fn token_store_round_trip() {
        let td = tempdir().unwrap();
        let store = TokenStore::new(td.path().join("nested").join("token"));
        assert_eq!(store.load().unwrap(), None);
        store.save("tok-1\n").unwrap();
        assert_eq!(store.session().unwrap().current_token().as_deref(), Some("tok-1"));
        store.remove().unwrap();
        store.remove().unwrap();
        assert!(!store.session().unwrap().is_authenticated());
    }
}
