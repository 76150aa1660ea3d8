//! Client configuration.
//!
//! [`ZontConfig`] is built explicitly with `with_*` setters or resolved from
//! the environment with [`ZontConfig::from_env`].

use std::path::Path;
use std::time::Duration;

use crate::error::{ZontError, ZontResult};
use crate::security::SecureString;
use crate::transport::RateLimit;

/// Default API base URL.
pub const DEFAULT_ENDPOINT: &str = "https://lk.zont-online.ru/api";

const ENV_TOKEN: &str = "ZONT_API_TOKEN";
const ENV_TOKEN_FILE: &str = "ZONT_API_TOKEN_FILE";
const ENV_CLIENT: &str = "ZONT_API_CLIENT";
const ENV_CLIENT_FILE: &str = "ZONT_API_CLIENT_FILE";
const ENV_LOGIN: &str = "ZONT_API_LOGIN";
const ENV_PASSWORD: &str = "ZONT_API_PASSWORD";
const ENV_ENDPOINT: &str = "ZONT_API_URL";

/// Configuration for connecting to the Zont API and pacing requests.
#[derive(Debug, Clone)]
pub struct ZontConfig {
    client_name: String,
    token: Option<SecureString>,
    login: Option<String>,
    password: Option<SecureString>,
    endpoint: String,
    timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    rate_limit: RateLimit,
    max_window: Duration,
    poll_interval: Duration,
    freshness_threshold: Duration,
    tick_timeout: Duration,
    shutdown_grace: Duration,
}

impl ZontConfig {
    /// Create a configuration using a pre-issued API token.
    pub fn new(client_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self::base(client_name.into(), Some(SecureString::new(token.into())))
    }

    /// Create a configuration that obtains its token with a login and password.
    pub fn with_login(
        client_name: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::base(client_name.into(), None);
        config.login = Some(login.into());
        config.password = Some(SecureString::new(password.into()));
        config
    }

    fn base(client_name: String, token: Option<SecureString>) -> Self {
        Self {
            client_name,
            token,
            login: None,
            password: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            rate_limit: RateLimit::new(30, Duration::from_secs(60)),
            max_window: Duration::from_secs(24 * 3600),
            poll_interval: Duration::from_secs(60),
            freshness_threshold: Duration::from_secs(180),
            tick_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    /// Resolve credentials from the process environment.
    ///
    /// The token comes from `ZONT_API_TOKEN`, or the first line of the file
    /// named by `ZONT_API_TOKEN_FILE`; the client name likewise from
    /// `ZONT_API_CLIENT`/`ZONT_API_CLIENT_FILE`. `ZONT_API_LOGIN` and
    /// `ZONT_API_PASSWORD` may replace the token.
    pub fn from_env() -> ZontResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve credentials through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ZontResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = resolve_value(&lookup, ENV_TOKEN, ENV_TOKEN_FILE)?;
        let login = lookup(ENV_LOGIN).filter(|v| !v.is_empty());
        let password = lookup(ENV_PASSWORD).filter(|v| !v.is_empty());

        if token.is_none() && (login.is_none() || password.is_none()) {
            return Err(ZontError::configuration(
                "token not provided: set ZONT_API_TOKEN, ZONT_API_TOKEN_FILE, \
                 or ZONT_API_LOGIN and ZONT_API_PASSWORD",
            ));
        }

        let client_name = resolve_value(&lookup, ENV_CLIENT, ENV_CLIENT_FILE)?.ok_or_else(|| {
            ZontError::configuration(
                "client not provided: set ZONT_API_CLIENT or ZONT_API_CLIENT_FILE",
            )
        })?;

        let mut config = Self::base(client_name, token.map(SecureString::new));
        config.login = login;
        config.password = password.map(SecureString::new);
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.is_empty()) {
            config.endpoint = endpoint;
        }
        Ok(config)
    }

    /// Set a custom API endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of retries after the first attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the exponential backoff base delay and cap.
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Set the request-rate ceiling shared by every caller of one client.
    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the widest time range a single `load_data` request may cover.
    pub fn with_max_window(mut self, max_window: Duration) -> Self {
        self.max_window = max_window;
        self
    }

    /// Set the poll exporter tick interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the age after which cached values are reported stale.
    pub fn with_freshness_threshold(mut self, threshold: Duration) -> Self {
        self.freshness_threshold = threshold;
        self
    }

    /// Set the upper bound on one poll tick.
    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    /// Set how long an in-flight tick may run after a stop signal.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Check that limits and intervals are usable.
    pub fn validate(&self) -> ZontResult<()> {
        if self.client_name.is_empty() {
            return Err(ZontError::configuration("client name must not be empty"));
        }
        if self.rate_limit.max_requests() == 0 || self.rate_limit.period().is_zero() {
            return Err(ZontError::configuration(
                "rate limit must allow at least one request per non-zero period",
            ));
        }
        if self.max_window < Duration::from_secs(1) {
            return Err(ZontError::configuration(
                "max window must be at least one second",
            ));
        }
        if self.poll_interval.is_zero() || self.freshness_threshold.is_zero() {
            return Err(ZontError::configuration(
                "poll interval and freshness threshold must be non-zero",
            ));
        }
        Ok(())
    }

    /// Get the API client name sent as `X-ZONT-Client`.
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Get the pre-issued token, if any.
    pub fn token(&self) -> Option<&SecureString> {
        self.token.as_ref()
    }

    /// Get the login used to obtain tokens, if any.
    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }

    /// Get the password used to obtain tokens, if any.
    pub fn password(&self) -> Option<&SecureString> {
        self.password.as_ref()
    }

    /// Get the API endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the backoff base delay.
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Get the backoff cap.
    pub fn backoff_cap(&self) -> Duration {
        self.backoff_cap
    }

    /// Get the rate limit.
    pub fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    /// Get the maximum query window.
    pub fn max_window(&self) -> Duration {
        self.max_window
    }

    /// Get the poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Get the freshness threshold.
    pub fn freshness_threshold(&self) -> Duration {
        self.freshness_threshold
    }

    /// Get the tick timeout.
    pub fn tick_timeout(&self) -> Duration {
        self.tick_timeout
    }

    /// Get the shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }
}

fn resolve_value<F>(lookup: &F, var: &str, file_var: &str) -> ZontResult<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
        return Ok(Some(value));
    }

    match lookup(file_var).filter(|v| !v.is_empty()) {
        Some(path) => read_first_line(Path::new(&path)),
        None => Ok(None),
    }
}

fn read_first_line(path: &Path) -> ZontResult<Option<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ZontError::configuration(format!("failed to read {}: {e}", path.display()))
    })?;
    Ok(content
        .lines()
        .next()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty()))
}
