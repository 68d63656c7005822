//! Pipeline orchestrator: periodic scan → rewrite → record → enqueue.
//!
//! Each cycle visits every channel pair in order with a pacing delay.
//! A post is recorded in the ledger *before* it is handed to moderation,
//! so a crash between the two loses the post rather than duplicating it.
//! Failures are contained per pair; a panicking cycle is logged and the
//! loop carries on at the next interval. A ledger write failure is the
//! exception: it ends the loop and is returned to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::env_parse;
use crate::error::{ConfigError, PipelineError};
use crate::moderation::ModerationQueue;
use crate::rewrite::RewriteEngine;
use crate::store::Ledger;

use super::scanner::FeedScanner;
use super::types::ChannelPair;

/// Longest the loop sleeps before rechecking the shutdown flag.
const SHUTDOWN_CHECK: Duration = Duration::from_secs(1);

/// Scheduling knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// Pause between two sources within a cycle.
    pub pacing: Duration,
    pub sweep_interval: chrono::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            pacing: Duration::from_secs(1),
            sweep_interval: chrono::Duration::hours(24),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: Duration::from_secs(
                env_parse("REPOSTER_POLL_INTERVAL_SECS", defaults.poll_interval.as_secs())?
                    .max(1),
            ),
            pacing: Duration::from_millis(env_parse(
                "REPOSTER_PACING_MS",
                defaults.pacing.as_millis() as u64,
            )?),
            ..defaults
        })
    }
}

/// Per-cycle tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub queued: usize,
    pub failed: usize,
}

/// Drives the pipeline across all channel pairs.
pub struct Orchestrator {
    pairs: Vec<ChannelPair>,
    scanner: FeedScanner,
    engine: Arc<RewriteEngine>,
    ledger: Arc<Ledger>,
    queue: Arc<ModerationQueue>,
    config: OrchestratorConfig,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl Orchestrator {
    pub fn new(
        pairs: Vec<ChannelPair>,
        scanner: FeedScanner,
        engine: Arc<RewriteEngine>,
        ledger: Arc<Ledger>,
        queue: Arc<ModerationQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pairs,
            scanner,
            engine,
            ledger,
            queue,
            config,
            last_sweep: Mutex::new(Utc::now()),
        }
    }

    pub fn pairs(&self) -> &[ChannelPair] {
        &self.pairs
    }

    /// One pass over every pair. Stops at the first fatal error.
    pub async fn run_cycle(&self) -> Result<CycleReport, PipelineError> {
        let mut report = CycleReport::default();

        for (i, pair) in self.pairs.iter().enumerate() {
            if i > 0 && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
            report.scanned += 1;

            match self.process_pair(pair).await {
                Ok(true) => report.queued += 1,
                Ok(false) => {}
                Err(e) if e.is_fatal() => {
                    error!(source = %pair.source, error = %e, "Ledger write failed, stopping");
                    return Err(e);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(source = %pair.source, error = %e, "Pair processing failed");
                }
            }
        }

        debug!(
            scanned = report.scanned,
            queued = report.queued,
            failed = report.failed,
            "Cycle finished"
        );
        Ok(report)
    }

    /// Scan one pair. Returns whether a post was queued.
    async fn process_pair(&self, pair: &ChannelPair) -> Result<bool, PipelineError> {
        let Some(post) = self.scanner.fetch_latest(pair).await? else {
            return Ok(false);
        };

        let rewritten = self.engine.rewrite(&post.original_text).await;
        let post = post.with_rewrite(rewritten);
        let key = post.key();

        self.ledger.mark_processed(&post).await?;

        if let Err(e) = self.queue.enqueue(post).await {
            warn!(key = %key, error = %e, "Post recorded but could not be queued");
            return Err(e.into());
        }
        Ok(true)
    }

    /// Sweep the moderation queue if a full sweep interval has passed.
    pub async fn maybe_sweep(&self, now: DateTime<Utc>) -> usize {
        let mut last = self.last_sweep.lock().await;
        if now - *last < self.config.sweep_interval {
            return 0;
        }
        *last = now;
        drop(last);
        self.queue.sweep(now).await
    }

    /// Run cycles on the poll interval until `shutdown` is set or a cycle
    /// fails fatally.
    ///
    /// Each cycle runs on its own task so a panic is contained; a running
    /// cycle finishes before the flag is honoured.
    pub async fn run_forever(self: Arc<Self>, shutdown: Arc<AtomicBool>) -> Result<(), PipelineError> {
        let interval = self.config.poll_interval;
        info!(
            pairs = self.pairs.len(),
            interval_secs = interval.as_secs(),
            "Orchestrator started"
        );

        let mut next = Instant::now();
        loop {
            if !wait_until(next, &shutdown).await {
                info!("Orchestrator shutting down");
                return Ok(());
            }

            let cycle = Arc::clone(&self);
            match tokio::spawn(async move { cycle.run_cycle().await }).await {
                Ok(Ok(report)) if report.queued > 0 => {
                    info!(queued = report.queued, failed = report.failed, "Cycle queued posts");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => error!(error = %e, "Cycle panicked, retrying next interval"),
            }

            self.maybe_sweep(Utc::now()).await;

            next += interval;
            let now = Instant::now();
            if next < now {
                next = now;
            }
        }
    }
}

/// Spawn [`Orchestrator::run_forever`].
///
/// Returns a `JoinHandle` and the shutdown flag that stops it.
pub fn spawn_orchestrator(
    orchestrator: Arc<Orchestrator>,
) -> (JoinHandle<Result<(), PipelineError>>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(orchestrator.run_forever(Arc::clone(&shutdown)));
    (handle, shutdown)
}

/// Sleep until `deadline`, returning `false` early if shutdown was requested.
async fn wait_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(SHUTDOWN_CHECK)).await;
    }
}
