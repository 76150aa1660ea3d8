use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::ZontConfig;
use crate::error::{ZontError, ZontResult};
use crate::logging::{truncate_field, MAX_FIELD_LENGTH};
use crate::security::SecureString;
use crate::transport::{
    ApiRequest, ClientContext, Credentials, PasswordLogin, StaticToken, TokenProvider, Transport,
};

/// HTTP client for the Zont API.
#[derive(Clone)]
pub struct ZontClient {
    config: Arc<ZontConfig>,
    http: Client,
    context: ClientContext,
    auth: Arc<dyn TokenProvider>,
}

impl ZontClient {
    /// Create a new client with its own rate budget and credential state.
    pub fn new(config: ZontConfig) -> ZontResult<Self> {
        let context = ClientContext::new(config.rate_limit(), config.token().cloned());
        Self::with_context(config, context)
    }

    /// Create a client that shares budget and credentials with other clients.
    pub fn with_context(config: ZontConfig, context: ClientContext) -> ZontResult<Self> {
        config.validate()?;

        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(format!("zont_api/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ZontError::Configuration {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        let auth: Arc<dyn TokenProvider> = match (config.login(), config.password()) {
            (Some(login), Some(password)) => Arc::new(PasswordLogin::new(login, password.clone())),
            _ => match config.token() {
                Some(token) => Arc::new(StaticToken::new(token.clone())),
                None => {
                    return Err(ZontError::configuration(
                        "either a token or a login and password is required",
                    ))
                }
            },
        };

        Ok(Self {
            config: Arc::new(config),
            http,
            context,
            auth,
        })
    }

    /// Get the shared request context.
    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Get the configuration.
    pub fn config(&self) -> &ZontConfig {
        &self.config
    }

    #[instrument(skip(self, request), fields(path = %request.path()))]
    async fn execute_with_retry(&self, request: &ApiRequest) -> ZontResult<Value> {
        let max_attempts = self.config.max_retries().saturating_add(1);
        let mut attempt: u32 = 0;
        let mut reauthenticated = false;
        let mut expired_generation: Option<u64> = None;

        loop {
            let acquired = match expired_generation {
                Some(generation) => self.reauthenticate(generation).await,
                None => self.current_credentials().await,
            };
            let credentials = match acquired {
                Ok(credentials) => credentials,
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    self.pause_before_retry(attempt, max_attempts, err).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            expired_generation = None;

            let Some(token) = credentials.token() else {
                return Err(ZontError::Authentication {
                    message: "no session token available".to_string(),
                });
            };

            self.context.acquire().await;
            attempt += 1;
            debug!(attempt, "sending request");

            match self.send_once(request, token).await {
                Ok(value) => return Ok(value),
                Err(ZontError::AuthExpired { message }) => {
                    if reauthenticated {
                        return Err(ZontError::Authentication { message });
                    }
                    reauthenticated = true;
                    warn!(attempt, "session token rejected, re-authenticating");
                    expired_generation = Some(credentials.generation());
                }
                Err(err) if err.is_retryable() => {
                    self.pause_before_retry(attempt, max_attempts, err).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Sleep before the next attempt, or give up once `max_attempts` is used.
    async fn pause_before_retry(
        &self,
        attempt: u32,
        max_attempts: u32,
        err: ZontError,
    ) -> ZontResult<()> {
        if attempt >= max_attempts {
            warn!(attempt, error = %err, "giving up after retries");
            return Err(ZontError::RetriesExhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = match err.retry_after() {
            Some(hint) => {
                self.context.defer_for(hint).await;
                hint
            }
            None => self.backoff_delay(attempt - 1),
        };
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn current_credentials(&self) -> ZontResult<Credentials> {
        let credentials = self.context.credentials().await;
        if credentials.token().is_some() {
            return Ok(credentials);
        }
        self.reauthenticate(credentials.generation()).await
    }

    async fn reauthenticate(&self, seen_generation: u64) -> ZontResult<Credentials> {
        self.context
            .refresh(seen_generation, self.auth.issues_request(), || {
                self.auth.fetch_token(
                    &self.http,
                    self.config.endpoint(),
                    self.config.client_name(),
                )
            })
            .await
    }

    async fn send_once(&self, request: &ApiRequest, token: &SecureString) -> ZontResult<Value> {
        let url = format!("{}{}", self.config.endpoint(), request.path());

        let mut builder = self
            .http
            .request(request.method().clone(), &url)
            .header("X-ZONT-Client", self.config.client_name())
            .header("X-ZONT-Token", token.expose());
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| ZontError::Network {
            message: e.to_string(),
        })?;

        Self::handle_response(response).await
    }

    /// Convert an HTTP response into a value or a classified error.
    async fn handle_response(response: Response) -> ZontResult<Value> {
        let status = response.status();
        let header_hint = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.map_err(|e| ZontError::Network {
            message: e.to_string(),
        })?;
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        match status.as_u16() {
            401 => Err(ZontError::AuthExpired {
                message: parsed
                    .as_ref()
                    .and_then(error_code)
                    .unwrap_or("unauthorized")
                    .to_string(),
            }),
            429 => Err(ZontError::RateLimited {
                retry_after: header_hint.or_else(|| parsed.as_ref().and_then(body_hint)),
            }),
            status if status >= 500 => Err(ZontError::ServerError {
                status,
                message: truncate_field(&body, MAX_FIELD_LENGTH),
            }),
            status if status >= 400 => match parsed.as_ref().and_then(error_code) {
                Some(code) => Err(classify_code(code, header_hint, parsed.as_ref())),
                None => Err(ZontError::InvalidRequest {
                    status,
                    message: truncate_field(&body, MAX_FIELD_LENGTH),
                }),
            },
            _ => {
                let value = parsed.ok_or_else(|| {
                    ZontError::serialization(format!(
                        "malformed response body: {}",
                        truncate_field(&body, 128)
                    ))
                })?;
                check_ok(value, header_hint)
            }
        }
    }

    /// Exponential backoff with jitter: `base * 2^retry`, capped, plus up to half of `base`.
    pub(crate) fn backoff_delay(&self, retry: u32) -> Duration {
        let base = self.config.backoff_base();
        let exponential = base.saturating_mul(1u32 << retry.min(16));
        let capped = exponential.min(self.config.backoff_cap());

        let jitter_cap = base.as_millis() as u64 / 2;
        let jitter_ms = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        capped + Duration::from_millis(jitter_ms)
    }
}

#[async_trait]
impl Transport for ZontClient {
    async fn execute(&self, request: ApiRequest) -> ZontResult<Value> {
        self.execute_with_retry(&request).await
    }
}

fn error_code(value: &Value) -> Option<&str> {
    value.get("error").and_then(Value::as_str)
}

fn body_hint(value: &Value) -> Option<Duration> {
    value
        .get("retry_after")
        .and_then(Value::as_u64)
        .map(Duration::from_secs)
}

fn check_ok(value: Value, header_hint: Option<Duration>) -> ZontResult<Value> {
    if value.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(value);
    }
    let code = error_code(&value).unwrap_or("request_failed");
    Err(classify_code(code, header_hint, Some(&value)))
}

fn classify_code(code: &str, header_hint: Option<Duration>, body: Option<&Value>) -> ZontError {
    match code {
        "auth_failed" | "invalid_token" | "token_expired" => ZontError::AuthExpired {
            message: code.to_string(),
        },
        "too_many_requests" | "rate_limit_exceeded" => ZontError::RateLimited {
            retry_after: header_hint.or_else(|| body.and_then(body_hint)),
        },
        "no_such_device" => ZontError::NotFound {
            message: code.to_string(),
        },
        other => ZontError::Api {
            code: other.to_string(),
        },
    }
}
