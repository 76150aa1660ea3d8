use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::error::ZontResult;
use crate::security::SecureString;
use crate::transport::{RateBudget, RateLimit};

/// The token currently in use, tagged with how many times it has been refreshed.
#[derive(Debug, Clone)]
pub struct Credentials {
    token: Option<SecureString>,
    generation: u64,
}

impl Credentials {
    /// Get the token, if one has been issued yet.
    pub fn token(&self) -> Option<&SecureString> {
        self.token.as_ref()
    }

    /// Get the refresh generation this token belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
struct ContextState {
    budget: RateBudget,
    credentials: Credentials,
}

/// Process-wide state shared by every caller of one API account.
///
/// The rate budget and the session credentials live behind a single mutex,
/// so two callers can neither overspend the budget nor refresh the token
/// twice for the same expiry. Clones share the same state.
#[derive(Debug, Clone)]
pub struct ClientContext {
    state: Arc<Mutex<ContextState>>,
}

impl ClientContext {
    /// Create a context with a fresh budget and an optional initial token.
    pub fn new(limit: RateLimit, token: Option<SecureString>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ContextState {
                budget: RateBudget::new(limit),
                credentials: Credentials {
                    token,
                    generation: 0,
                },
            })),
        }
    }

    /// Wait until the budget allows one more request, then reserve it.
    pub async fn acquire(&self) {
        loop {
            let retry_at = {
                let mut state = self.state.lock().await;
                match state.budget.try_acquire(Instant::now()) {
                    Ok(()) => return,
                    Err(retry_at) => retry_at,
                }
            };
            debug!(
                wait_ms = retry_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "rate budget exhausted, deferring request"
            );
            sleep_until(retry_at).await;
        }
    }

    /// Number of requests that could be sent right now.
    pub async fn remaining(&self) -> u32 {
        self.state.lock().await.budget.remaining(Instant::now())
    }

    /// Hold back every caller for `delay`, honouring a server rate-limit hint.
    pub async fn defer_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        self.state.lock().await.budget.defer_until(until);
    }

    /// Snapshot of the current credentials.
    pub async fn credentials(&self) -> Credentials {
        self.state.lock().await.credentials.clone()
    }

    /// Replace the token unless someone already did since `seen_generation`.
    ///
    /// The lock is held while `fetch` runs, so concurrent callers that saw the
    /// same expired token wait for this refresh instead of starting their own.
    /// When `consumes_request` is set the refresh is charged to the budget.
    pub async fn refresh<F, Fut>(
        &self,
        seen_generation: u64,
        consumes_request: bool,
        fetch: F,
    ) -> ZontResult<Credentials>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ZontResult<SecureString>>,
    {
        let mut state = self.state.lock().await;

        if state.credentials.generation != seen_generation && state.credentials.token.is_some() {
            debug!(
                generation = state.credentials.generation,
                "credentials already refreshed by another caller"
            );
            return Ok(state.credentials.clone());
        }

        if consumes_request {
            while let Err(retry_at) = state.budget.try_acquire(Instant::now()) {
                sleep_until(retry_at).await;
            }
        }

        let token = fetch().await?;
        state.credentials = Credentials {
            token: Some(token),
            generation: state.credentials.generation + 1,
        };
        info!(
            generation = state.credentials.generation,
            "session credentials refreshed"
        );
        Ok(state.credentials.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_capacity() {
        let context = ClientContext::new(RateLimit::new(2, Duration::from_secs(10)), None);
        let start = Instant::now();

        context.acquire().await;
        context.acquire().await;
        assert_eq!(context.remaining().await, 0);

        context.acquire().await;
        assert!(Instant::now() >= start + Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_for_delays_next_acquire() {
        let context = ClientContext::new(RateLimit::new(10, Duration::from_secs(1)), None);
        let start = Instant::now();

        context.defer_for(Duration::from_secs(7)).await;
        context.acquire().await;

        assert!(Instant::now() >= start + Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_happens_once() {
        let context = ClientContext::new(
            RateLimit::new(100, Duration::from_secs(1)),
            Some(SecureString::new("expired")),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = context.credentials().await.generation();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let context = context.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                context
                    .refresh(seen, true, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(SecureString::new("fresh"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let credentials = handle.await.unwrap().unwrap();
            assert_eq!(credentials.token().map(|t| t.expose()), Some("fresh"));
            assert_eq!(credentials.generation(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_old_credentials() {
        let context = ClientContext::new(
            RateLimit::new(100, Duration::from_secs(1)),
            Some(SecureString::new("old")),
        );

        let result = context
            .refresh(0, false, || async {
                Err(crate::error::ZontError::Authentication {
                    message: "bad password".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        let credentials = context.credentials().await;
        assert_eq!(credentials.token().map(|t| t.expose()), Some("old"));
        assert_eq!(credentials.generation(), 0);
    }
}
