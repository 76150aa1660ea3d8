use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::ZontConfig;
use crate::error::ZontError;
use crate::poller::{MetricCache, PollSource};
use crate::shutdown::stop_requested;

/// Where the poll loop currently is.
///
/// `Updated` and `FailedKeepStale` describe the last finished tick and hold
/// until the next one starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollState {
    #[default]
    Idle,
    Fetching,
    Updated,
    FailedKeepStale,
    Stopped,
}

/// Totals reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub ticks: u64,
    /// Source polls that refreshed the cache.
    pub updated: u64,
    /// Source polls that failed, timed out or were abandoned.
    pub failed: u64,
}

/// Result of a single tick, counted per source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub updated: usize,
    pub failed: usize,
}

/// Periodically polls its sources into a [`MetricCache`].
pub struct PollExporter {
    cache: MetricCache,
    sources: Vec<Arc<dyn PollSource>>,
    interval: Duration,
    tick_timeout: Duration,
    shutdown_grace: Duration,
    state: watch::Sender<PollState>,
}

impl PollExporter {
    pub fn new(cache: MetricCache, interval: Duration) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            cache,
            sources: Vec::new(),
            interval,
            tick_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            state,
        }
    }

    /// Cache, interval and timeouts taken from `config`.
    pub fn from_config(config: &ZontConfig) -> Self {
        Self::new(
            MetricCache::new(config.freshness_threshold()),
            config.poll_interval(),
        )
        .with_tick_timeout(config.tick_timeout())
        .with_shutdown_grace(config.shutdown_grace())
    }

    pub fn with_source(mut self, source: Arc<dyn PollSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_tick_timeout(mut self, tick_timeout: Duration) -> Self {
        self.tick_timeout = tick_timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Handle for consumers; reads never wait on the loop.
    pub fn cache(&self) -> MetricCache {
        self.cache.clone()
    }

    pub fn state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Poll every source once, concurrently.
    ///
    /// A failing source leaves its cached values in place; entries past the
    /// freshness threshold are flagged stale.
    pub async fn tick(&self) -> TickOutcome {
        self.state.send_replace(PollState::Fetching);

        let tick_timeout = self.tick_timeout;
        let polls = self.sources.iter().map(|source| async move {
            let result = match timeout(tick_timeout, source.poll()).await {
                Ok(result) => result,
                Err(_) => Err(ZontError::Network {
                    message: format!("poll timed out after {tick_timeout:?}"),
                }),
            };
            (source.name(), result)
        });

        let mut outcome = TickOutcome::default();
        for (name, result) in join_all(polls).await {
            match result {
                Ok(readings) => {
                    let count = self.cache.update(readings);
                    debug!(source = name, readings = count, "cache updated");
                    outcome.updated += 1;
                }
                Err(e) => {
                    warn!(source = name, error = %e, "poll failed, keeping last values");
                    outcome.failed += 1;
                }
            }
        }

        if outcome.failed > 0 {
            self.degrade();
        } else {
            self.state.send_replace(PollState::Updated);
        }
        outcome
    }

    /// Run until `shutdown` is raised.
    ///
    /// A tick in flight when the stop arrives gets the shutdown grace period
    /// to finish before it is abandoned.
    #[instrument(skip_all, fields(interval = ?self.interval, sources = self.sources.len()))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> PollerStats {
        info!("Poll exporter started");
        let mut stats = PollerStats::default();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (outcome, stop) = self.tick_or_stop(&mut shutdown).await;
                    stats.ticks += 1;
                    stats.updated += outcome.updated as u64;
                    stats.failed += outcome.failed as u64;
                    if stop {
                        break;
                    }
                }
                Ok(()) = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        self.state.send_replace(PollState::Stopped);
        info!(
            "Poll exporter stopped: {} ticks, {} updated, {} failed",
            stats.ticks, stats.updated, stats.failed
        );
        stats
    }

    async fn tick_or_stop(&self, shutdown: &mut watch::Receiver<bool>) -> (TickOutcome, bool) {
        let tick = self.tick();
        tokio::pin!(tick);

        tokio::select! {
            outcome = &mut tick => (outcome, false),
            _ = stop_requested(shutdown) => {
                info!(
                    "Shutdown signal received during tick, waiting up to {:?}",
                    self.shutdown_grace
                );
                match timeout(self.shutdown_grace, &mut tick).await {
                    Ok(outcome) => (outcome, true),
                    Err(_) => {
                        warn!("In-flight tick abandoned");
                        self.degrade();
                        let abandoned = TickOutcome {
                            updated: 0,
                            failed: self.sources.len(),
                        };
                        (abandoned, true)
                    }
                }
            }
        }
    }

    fn degrade(&self) {
        let marked = self.cache.mark_stale();
        if marked > 0 {
            warn!(entries = marked, "cached values went stale");
        }
        self.state.send_replace(PollState::FailedKeepStale);
    }
}
