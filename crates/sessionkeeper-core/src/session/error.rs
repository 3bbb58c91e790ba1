use thiserror::Error;

/// Failure reported by the auth collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Token rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// A message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials(msg) if !msg.is_empty() => msg.clone(),
            AuthError::InvalidCredentials(_) => "Invalid username or password".to_string(),
            AuthError::Rejected(_) => "Session expired. Please log in again.".to_string(),
            AuthError::Network(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::Server(_) => "The server had a problem. Please try again.".to_string(),
            AuthError::InvalidResponse(_) => "Unexpected response from server.".to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("No token stored")]
    NoToken,

    #[error("Token has expired")]
    Expired,

    #[error("Stored token is malformed")]
    MalformedToken,

    /// The session changed (logout, new login) while the call was in flight.
    #[error("Session changed while the request was in flight")]
    Superseded,
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Auth(e) => e.user_message(),
            SessionError::NoToken | SessionError::Expired => {
                "Session expired. Please log in again.".to_string()
            }
            SessionError::MalformedToken => "Stored session was invalid. Please log in again.".to_string(),
            SessionError::Superseded => "Session changed. Please retry.".to_string(),
        }
    }
}
