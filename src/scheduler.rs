//! Periodic feed ingestion and store pruning.
//!
//! Two independent loops share the store: ingestion fetches every enabled
//! feed and merges what it finds, pruning drops records no feed has
//! reported recently. Neither ever clears the store, and a failing feed
//! only loses its own contribution for that cycle.

use crate::config::{Config, FeedDescriptor};
use crate::error::FeedError;
use crate::feeds::{self, FeedFetcher};
use crate::normalize::normalize;
use crate::store::{ReputationStore, Sighting};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Counters for one feed's contribution to a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Candidate strings produced by the parser.
    pub candidates: usize,
    /// Candidates the normalizer rejected.
    pub rejected: usize,
    /// New records created.
    pub inserted: usize,
    /// Existing records refreshed.
    pub refreshed: usize,
}

/// Counters for a whole ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub feeds_succeeded: usize,
    pub feeds_failed: usize,
    /// Names of the feeds that failed, in completion order.
    pub failed_feeds: Vec<String>,
    pub candidates: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub refreshed: usize,
}

impl CycleStats {
    fn record(&mut self, feed: FeedStats) {
        self.feeds_succeeded += 1;
        self.candidates += feed.candidates;
        self.rejected += feed.rejected;
        self.inserted += feed.inserted;
        self.refreshed += feed.refreshed;
    }

    fn fail(&mut self, feed: String) {
        self.feeds_failed += 1;
        self.failed_feeds.push(feed);
    }
}

/// Fetch, parse and merge a single feed into the store.
pub async fn ingest_feed(
    fetcher: &dyn FeedFetcher,
    store: &ReputationStore,
    feed: &FeedDescriptor,
) -> Result<FeedStats, FeedError> {
    let body = fetcher.fetch(feed).await?;

    let candidates = feeds::parse(&feed.format, &body).map_err(|source| FeedError::Parse {
        feed: feed.name.clone(),
        source,
    })?;

    let now = Instant::now();
    let mut stats = FeedStats {
        candidates: candidates.len(),
        ..FeedStats::default()
    };

    for candidate in &candidates {
        match normalize(candidate) {
            Some(ip) => match store.insert_or_refresh(ip, now) {
                Sighting::Inserted => stats.inserted += 1,
                Sighting::Refreshed => stats.refreshed += 1,
            },
            None => stats.rejected += 1,
        }
    }

    Ok(stats)
}

/// Drives ingestion and pruning on their own cadences.
pub struct IngestionScheduler {
    store: Arc<ReputationStore>,
    fetcher: Arc<dyn FeedFetcher>,
    /// Enabled feeds only.
    feeds: Arc<[FeedDescriptor]>,
    ingestion_interval: Duration,
    prune_interval: Duration,
    max_age: Duration,
}

impl IngestionScheduler {
    /// Create a scheduler for the feeds and intervals in `config`.
    pub fn new(config: &Config, store: Arc<ReputationStore>, fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self {
            store,
            fetcher,
            feeds: config.enabled_feeds().into(),
            ingestion_interval: config.ingestion.interval(),
            prune_interval: config.pruning.interval(),
            max_age: config.pruning.max_age(),
        }
    }

    /// Run one ingestion cycle over every enabled feed.
    ///
    /// Feeds are processed concurrently, each in its own task; a feed that
    /// fails to fetch, fails to parse, or panics is logged and skipped.
    pub async fn run_ingestion_cycle(&self) -> CycleStats {
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        let mut task_feeds = HashMap::new();

        for feed in self.feeds.iter().cloned() {
            let store = self.store.clone();
            let fetcher = self.fetcher.clone();
            let name = feed.name.clone();
            let task = tasks.spawn(async move {
                let result = ingest_feed(fetcher.as_ref(), &store, &feed).await;
                (feed.name, result)
            });
            task_feeds.insert(task.id(), name);
        }

        let mut stats = CycleStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(feed_stats))) => {
                    info!(
                        feed = %name,
                        candidates = feed_stats.candidates,
                        rejected = feed_stats.rejected,
                        inserted = feed_stats.inserted,
                        refreshed = feed_stats.refreshed,
                        "Feed ingested"
                    );
                    stats.record(feed_stats);
                }
                Ok((name, Err(e))) => {
                    warn!(feed = %name, error = %e, "Feed skipped this cycle");
                    stats.fail(name);
                }
                Err(e) => {
                    let name = task_feeds.remove(&e.id()).unwrap_or_default();
                    error!(feed = %name, error = %e, "Feed task aborted");
                    stats.fail(name);
                }
            }
        }

        info!(
            feeds_succeeded = stats.feeds_succeeded,
            feeds_failed = stats.feeds_failed,
            inserted = stats.inserted,
            refreshed = stats.refreshed,
            records = self.store.count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Ingestion cycle complete"
        );

        stats
    }

    /// Run one pruning pass and return the number of records removed.
    pub fn run_prune_cycle(&self) -> usize {
        let removed = self.store.prune_older_than(self.max_age, Instant::now());
        info!(
            removed,
            records = self.store.count(),
            max_age_seconds = self.max_age.as_secs(),
            "Prune cycle complete"
        );
        removed
    }

    /// Start the ingestion and pruning loops.
    ///
    /// Ingestion runs immediately and then every ingestion interval; the
    /// first prune happens one prune interval after start. Both loops stop
    /// when [`SchedulerHandle::shutdown`] is called or the handle is dropped.
    pub fn spawn(self) -> SchedulerHandle {
        let scheduler = Arc::new(self);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            feeds = scheduler.feeds.len(),
            ingestion_interval_seconds = scheduler.ingestion_interval.as_secs(),
            prune_interval_seconds = scheduler.prune_interval.as_secs(),
            "Starting feed scheduler"
        );

        let ingestion = tokio::spawn(scheduler.clone().ingestion_loop(shutdown_rx.clone()));
        let pruning = tokio::spawn(scheduler.pruning_loop(shutdown_rx));

        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks: vec![ingestion, pruning],
        }
    }

    async fn ingestion_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.ingestion_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            debug!("Running scheduled feed ingestion");
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.run_ingestion_cycle() => {}
            }
        }

        info!("Stopping feed ingestion");
    }

    async fn pruning_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.prune_interval;
        let mut ticker = tokio::time::interval_at(start, self.prune_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.run_prune_cycle();
                }
            }
        }

        info!("Stopping store pruning");
    }
}

/// Handle to the running scheduler loops.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop both loops, abandoning any in-flight ingestion cycle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }
}
