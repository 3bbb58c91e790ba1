//! Session state published by the controller, and the identity types it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Authenticated,
    Unauthenticated,
}

/// Phase plus the derived `Error` status shown while an error message is
/// pending outside an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Authenticated,
    Unauthenticated,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "crate::utils::serde_helpers::string_or_number")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Any other profile fields the server returns.
    #[serde(flatten)]
    pub attributes: Map<String, JsonValue>,
}

/// A partial change to a [`User`]. The id never changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, JsonValue>,
}

impl User {
    /// Merge `update` into this user. Attributes set to `null` are removed.
    pub fn apply(&mut self, update: UserUpdate) {
        if let Some(username) = update.username {
            self.username = username;
        }
        if let Some(email) = update.email {
            self.email = Some(email);
        }
        for (key, value) in update.attributes {
            if value.is_null() {
                self.attributes.remove(&key);
            } else {
                self.attributes.insert(key, value);
            }
        }
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Extra sign-up fields forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub user: Option<User>,
    pub token: Option<String>,
    pub session_expiry: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self.phase {
            SessionPhase::Authenticated => SessionStatus::Authenticated,
            _ if self.error.is_some() => SessionStatus::Error,
            SessionPhase::Uninitialized => SessionStatus::Uninitialized,
            SessionPhase::Unauthenticated => SessionStatus::Unauthenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated
    }

    pub(crate) fn authenticated(user: User, token: String, expiry: DateTime<Utc>) -> Self {
        Self {
            phase: SessionPhase::Authenticated,
            user: Some(user),
            token: Some(token),
            session_expiry: Some(expiry),
            is_loading: false,
            error: None,
        }
    }

    pub(crate) fn unauthenticated(error: Option<String>) -> Self {
        Self {
            phase: SessionPhase::Unauthenticated,
            error,
            ..Self::default()
        }
    }
}
