use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::error::{ZontError, ZontResult};
use crate::security::SecureString;

/// Source of session tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Whether obtaining a token sends a request to the API.
    fn issues_request(&self) -> bool {
        true
    }

    /// Obtain a token to send as `X-ZONT-Token`.
    async fn fetch_token(
        &self,
        http: &reqwest::Client,
        endpoint: &str,
        client_name: &str,
    ) -> ZontResult<SecureString>;
}

/// A token issued out of band; "refreshing" it yields the same value.
pub struct StaticToken {
    token: SecureString,
}

impl StaticToken {
    /// Wrap a pre-issued token.
    pub fn new(token: SecureString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    fn issues_request(&self) -> bool {
        false
    }

    async fn fetch_token(
        &self,
        _http: &reqwest::Client,
        _endpoint: &str,
        _client_name: &str,
    ) -> ZontResult<SecureString> {
        Ok(self.token.clone())
    }
}

/// Obtains tokens from `/get_authtoken` using HTTP basic authentication.
pub struct PasswordLogin {
    login: String,
    password: SecureString,
}

#[derive(Debug, Deserialize)]
struct AuthTokenResponse {
    #[serde(default)]
    ok: bool,
    token: Option<String>,
    error: Option<String>,
}

impl PasswordLogin {
    /// Create a provider for the given account.
    pub fn new(login: impl Into<String>, password: SecureString) -> Self {
        Self {
            login: login.into(),
            password,
        }
    }
}

#[async_trait]
impl TokenProvider for PasswordLogin {
    #[instrument(skip(self, http), fields(login = %self.login))]
    async fn fetch_token(
        &self,
        http: &reqwest::Client,
        endpoint: &str,
        client_name: &str,
    ) -> ZontResult<SecureString> {
        let url = format!("{endpoint}/get_authtoken");

        let response = http
            .post(&url)
            .basic_auth(&self.login, Some(self.password.expose()))
            .header("X-ZONT-Client", client_name)
            .json(&json!({ "client_name": client_name }))
            .send()
            .await
            .map_err(|e| ZontError::Network {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ZontError::Authentication {
                message: format!("login rejected with status {status}"),
            });
        }
        if status.is_server_error() {
            return Err(ZontError::ServerError {
                status: status.as_u16(),
                message: "token request failed".to_string(),
            });
        }

        let body: AuthTokenResponse = response.json().await.map_err(|e| {
            ZontError::serialization(format!("malformed get_authtoken response: {e}"))
        })?;

        match (body.ok, body.token) {
            (true, Some(token)) if !token.is_empty() => Ok(SecureString::new(token)),
            _ => Err(ZontError::Authentication {
                message: body
                    .error
                    .unwrap_or_else(|| "get_authtoken returned no token".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_returns_same_value() {
        let provider = StaticToken::new(SecureString::new("abc"));
        let http = reqwest::Client::new();

        let token = provider
            .fetch_token(&http, "http://localhost:1", "client")
            .await
            .unwrap();

        assert_eq!(token.expose(), "abc");
        assert!(!provider.issues_request());
    }

    #[tokio::test]
    async fn test_password_login_parses_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/get_authtoken")
            .match_header("X-ZONT-Client", "client@example.com")
            .match_header("authorization", mockito::Matcher::Regex("^Basic ".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true, "token": "issued-token", "token_id": "t1"}"#)
            .create_async()
            .await;

        let provider = PasswordLogin::new("user", SecureString::new("secret"));
        let token = provider
            .fetch_token(&reqwest::Client::new(), &server.url(), "client@example.com")
            .await
            .unwrap();

        assert_eq!(token.expose(), "issued-token");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_password_login_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/get_authtoken")
            .with_status(200)
            .with_body(r#"{"ok": false, "error": "wrong_login_or_password"}"#)
            .create_async()
            .await;

        let provider = PasswordLogin::new("user", SecureString::new("bad"));
        let err = provider
            .fetch_token(&reqwest::Client::new(), &server.url(), "client")
            .await
            .unwrap_err();

        assert!(matches!(err, ZontError::Authentication { .. }));
        assert!(err.to_string().contains("wrong_login_or_password"));
    }
}
