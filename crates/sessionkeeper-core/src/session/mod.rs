//! Session lifecycle management.
//!
//! This module provides:
//! - `SessionController`: the login/logout/refresh state machine
//! - `AuthBackend`: the auth collaborator contract the controller consumes
//! - `SessionState`: the observable state published to the UI

pub mod backend;
pub mod controller;
pub mod error;
pub mod state;

pub use backend::{AuthBackend, AuthGrant, RefreshGrant};
pub use controller::SessionController;
pub use error::{AuthError, SessionError};
pub use state::{
    Credentials, Registration, SessionPhase, SessionState, SessionStatus, User, UserUpdate,
};
