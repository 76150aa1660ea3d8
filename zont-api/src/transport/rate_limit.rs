use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Request-rate ceiling: at most `max_requests` in any `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    max_requests: u32,
    period: Duration,
}

impl RateLimit {
    /// Create a new limit.
    pub fn new(max_requests: u32, period: Duration) -> Self {
        Self {
            max_requests,
            period,
        }
    }

    /// Get the number of requests allowed per period.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Get the limiter period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Remaining request allowance, tracked over a sliding window.
///
/// Every issued request is logged; entries older than one period roll off.
/// A request that would exceed the limit is not dropped: the caller gets back
/// the instant at which capacity frees up and waits for it.
#[derive(Debug)]
pub struct RateBudget {
    limit: RateLimit,
    issued: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl RateBudget {
    /// Create an unused budget.
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            issued: VecDeque::with_capacity(limit.max_requests as usize),
            blocked_until: None,
        }
    }

    /// Get the configured limit.
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Reserve one request at `now`, or return when to try again.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Instant> {
        self.expire(now);

        if let Some(until) = self.blocked_until {
            if now < until {
                return Err(until);
            }
            self.blocked_until = None;
        }

        if (self.issued.len() as u32) < self.limit.max_requests {
            self.issued.push_back(now);
            return Ok(());
        }

        match self.issued.front() {
            Some(oldest) => Err(*oldest + self.limit.period),
            // Zero-capacity budget: nothing will ever roll off.
            None => Err(now + self.limit.period),
        }
    }

    /// Number of requests that could be issued at `now`.
    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.expire(now);
        if self.blocked_until.is_some_and(|until| now < until) {
            return 0;
        }
        self.limit
            .max_requests
            .saturating_sub(self.issued.len() as u32)
    }

    /// Hold every caller back until `until`, e.g. after a server-side rate-limit hint.
    pub fn defer_until(&mut self, until: Instant) {
        self.blocked_until = Some(match self.blocked_until {
            Some(current) if current > until => current,
            _ => until,
        });
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.issued.front() {
            if *oldest + self.limit.period <= now {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }
}
