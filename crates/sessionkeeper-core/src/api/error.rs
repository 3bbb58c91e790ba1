use serde::Deserialize;
use thiserror::Error;

use crate::session::AuthError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Flask-style error bodies: `{"error": "..."}` or `{"message": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Prefer the server's own message over the raw body.
    fn server_message(body: &str) -> String {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.error.or(b.message))
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::server_message(body);
        match status.as_u16() {
            400 | 422 => ApiError::BadRequest(message),
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            409 => ApiError::Conflict(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }

    /// Map onto the collaborator error for a credential exchange (login, register).
    pub fn into_credential_error(self) -> AuthError {
        match self {
            ApiError::BadRequest(m)
            | ApiError::Unauthorized(m)
            | ApiError::AccessDenied(m)
            | ApiError::Conflict(m) => AuthError::InvalidCredentials(m),
            other => other.into_auth_error(),
        }
    }

    /// Map onto the collaborator error for a call authenticated by a token.
    pub fn into_auth_error(self) -> AuthError {
        match self {
            ApiError::Unauthorized(m) | ApiError::AccessDenied(m) => AuthError::Rejected(m),
            ApiError::BadRequest(m) | ApiError::NotFound(m) | ApiError::Conflict(m) => {
                AuthError::Rejected(m)
            }
            ApiError::RateLimited => AuthError::Server("rate limited".to_string()),
            ApiError::ServerError(m) => AuthError::Server(m),
            ApiError::NetworkError(e) if e.is_decode() => AuthError::InvalidResponse(e.to_string()),
            ApiError::NetworkError(e) => AuthError::Network(e.to_string()),
            ApiError::InvalidResponse(m) => AuthError::InvalidResponse(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_prefers_server_message() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"error": "Bad password"}"#);
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "Bad password"));

        let err = ApiError::from_status(StatusCode::CONFLICT, r#"{"message": "Username taken"}"#);
        assert!(matches!(err, ApiError::Conflict(ref m) if m == "Username taken"));

        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert!(matches!(err, ApiError::ServerError(ref m) if m == "<html>oops</html>"));
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(600);
        let truncated = ApiError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_error_mapping_depends_on_call() {
        let login = ApiError::Unauthorized("nope".to_string()).into_credential_error();
        assert_eq!(login, AuthError::InvalidCredentials("nope".to_string()));

        let refresh = ApiError::Unauthorized("expired".to_string()).into_auth_error();
        assert_eq!(refresh, AuthError::Rejected("expired".to_string()));

        let server = ApiError::ServerError("down".to_string()).into_credential_error();
        assert_eq!(server, AuthError::Server("down".to_string()));
    }
}
