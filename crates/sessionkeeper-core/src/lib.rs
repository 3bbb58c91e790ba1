//! Sessionkeeper core - client-side auth session lifecycle.
//!
//! This crate keeps a bearer token and its expiry in durable storage, decides
//! when the token should be refreshed, and runs the login/logout/refresh
//! state machine that front ends observe.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod session;
pub mod utils;

pub use api::{ApiError, HttpAuthClient};
pub use auth::{StorageBackend, StoreSettings, TokenStatus, TokenStatusReport, TokenStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, StorageKind};
pub use session::{
    AuthBackend, AuthError, Credentials, Registration, SessionController, SessionError,
    SessionPhase, SessionState, SessionStatus, User, UserUpdate,
};
