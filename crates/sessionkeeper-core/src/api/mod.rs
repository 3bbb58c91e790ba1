//! HTTP implementation of the auth collaborator.
//!
//! `HttpAuthClient` talks to the application's REST backend for login,
//! registration, token refresh, identity lookup and logout. It is the
//! production [`AuthBackend`](crate::session::AuthBackend).

pub mod client;
pub mod error;

pub use client::HttpAuthClient;
pub use error::ApiError;
