//! The auth collaborator contract consumed by the session controller.

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;

use super::error::AuthError;
use super::state::{Credentials, Registration, User};

/// Result of a successful login or registration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthGrant {
    #[serde(alias = "access_token")]
    pub token: String,
    pub user: User,
    /// Token lifetime in seconds, when the server states one.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshGrant {
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl AuthGrant {
    pub fn lifetime(&self) -> Option<Duration> {
        self.expires_in.and_then(Duration::try_seconds)
    }
}

impl RefreshGrant {
    pub fn lifetime(&self) -> Option<Duration> {
        self.expires_in.and_then(Duration::try_seconds)
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, AuthError>;

    async fn register(&self, registration: &Registration) -> Result<AuthGrant, AuthError>;

    async fn refresh(&self, token: &str) -> Result<RefreshGrant, AuthError>;

    async fn fetch_current_user(&self, token: &str) -> Result<User, AuthError>;

    /// Best effort; the controller only logs failures.
    async fn invalidate_session(&self, token: &str) -> Result<(), AuthError>;
}
