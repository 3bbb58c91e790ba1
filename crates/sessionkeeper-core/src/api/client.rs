//! REST client for the application's auth endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::ApiError;
use crate::session::{AuthBackend, AuthError, AuthGrant, Credentials, RefreshGrant, Registration, User};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const LOGIN_PATH: &str = "auth/login";
const REGISTER_PATH: &str = "auth/register";
const REFRESH_PATH: &str = "auth/refresh";
const ME_PATH: &str = "auth/me";
const LOGOUT_PATH: &str = "auth/logout";

/// Auth API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthClient {
    client: Client,
    base_url: String,
}

impl HttpAuthClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&B>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json");
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(%method, url = %url, "Sending auth request");
            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// `/auth/me` answers either `{"user": {...}}` or the bare user object.
    fn parse_user(value: JsonValue) -> Result<User, ApiError> {
        let user = match value {
            JsonValue::Object(mut map) if map.get("user").is_some_and(JsonValue::is_object) => {
                map.remove("user").unwrap_or_default()
            }
            other => other,
        };
        serde_json::from_value(user).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthGrant, AuthError> {
        let response = self
            .send(Method::POST, LOGIN_PATH, None, Some(credentials))
            .await
            .map_err(ApiError::into_credential_error)?;
        Self::json(response).await.map_err(ApiError::into_auth_error)
    }

    async fn register(&self, registration: &Registration) -> Result<AuthGrant, AuthError> {
        let response = self
            .send(Method::POST, REGISTER_PATH, None, Some(registration))
            .await
            .map_err(ApiError::into_credential_error)?;
        Self::json(response).await.map_err(ApiError::into_auth_error)
    }

    async fn refresh(&self, token: &str) -> Result<RefreshGrant, AuthError> {
        let response = self
            .send::<()>(Method::POST, REFRESH_PATH, Some(token), None)
            .await
            .map_err(ApiError::into_auth_error)?;
        Self::json(response).await.map_err(ApiError::into_auth_error)
    }

    async fn fetch_current_user(&self, token: &str) -> Result<User, AuthError> {
        let response = self
            .send::<()>(Method::GET, ME_PATH, Some(token), None)
            .await
            .map_err(ApiError::into_auth_error)?;
        let value: JsonValue = Self::json(response).await.map_err(ApiError::into_auth_error)?;
        Self::parse_user(value).map_err(ApiError::into_auth_error)
    }

    async fn invalidate_session(&self, token: &str) -> Result<(), AuthError> {
        self.send::<()>(Method::POST, LOGOUT_PATH, Some(token), None)
            .await
            .map(|_| ())
            .map_err(ApiError::into_auth_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> HttpAuthClient {
        HttpAuthClient::new(format!("{}/api/", server.uri())).expect("Failed to build client")
    }

    #[test]
    fn test_url_joining() {
        let client = HttpAuthClient::new("http://localhost:5000/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000/api");
        assert_eq!(client.url("/auth/login"), "http://localhost:5000/api/auth/login");
    }

    #[test]
    fn test_parse_user_accepts_wrapped_and_bare() {
        let wrapped = HttpAuthClient::parse_user(json!({"user": {"id": 3, "username": "ada"}}))
            .expect("Failed to parse wrapped user");
        assert_eq!(wrapped.id, "3");

        let bare = HttpAuthClient::parse_user(json!({"id": "u-9", "username": "grace"}))
            .expect("Failed to parse bare user");
        assert_eq!(bare.username, "grace");

        assert!(HttpAuthClient::parse_user(json!({"username": "no id"})).is_err());
    }

    #[tokio::test]
    async fn test_authenticate_posts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(json!({"username": "ada", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a.b.c",
                "expires_in": 900,
                "user": {"id": 1, "username": "ada"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let grant = client
            .authenticate(&Credentials::new("ada", "secret"))
            .await
            .expect("login should succeed");
        assert_eq!(grant.token, "a.b.c");
        assert_eq!(grant.expires_in, Some(900));
        assert_eq!(grant.user.username, "ada");
    }

    #[tokio::test]
    async fn test_authenticate_maps_401_to_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid password"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .authenticate(&Credentials::new("ada", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials("Invalid password".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_sends_bearer_and_maps_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(header("authorization", "Bearer old.token.sig"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "new.token.sig"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(header("authorization", "Bearer revoked.token.sig"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Token revoked"})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let grant = client.refresh("old.token.sig").await.unwrap();
        assert_eq!(grant.token, "new.token.sig");
        assert_eq!(grant.expires_in, None);

        let err = client.refresh("revoked.token.sig").await.unwrap_err();
        assert_eq!(err, AuthError::Rejected("Token revoked".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_current_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": {"id": 5, "username": "ada", "email": "ada@example.com"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let user = client.fetch_current_user("a.b.c").await.unwrap();
        assert_eq!(user.id, "5");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.refresh("a.b.c").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_invalidate_session_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.invalidate_session("a.b.c").await.unwrap_err();
        assert!(matches!(err, AuthError::Server(_)));
    }
}
