//! Fixed-interval driver for ingestion cycles.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::ingest::Ingestor;

/// Runs one ingestion cycle per tick. The first tick fires immediately.
pub struct Scheduler {
    ingestor: Ingestor,
    interval: Duration,
    max_cycles: Option<usize>,
}

impl Scheduler {
    /// `interval` must be non-zero.
    pub fn new(ingestor: Ingestor, interval: Duration) -> Self {
        Self {
            ingestor,
            interval,
            max_cycles: None,
        }
    }

    /// Stop after `cycles` cycles instead of running until shutdown.
    pub fn with_max_cycles(mut self, cycles: usize) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    /// Never returns unless a cycle bound was set.
    pub async fn run_forever(&self) -> usize {
        self.run_until(std::future::pending()).await
    }

    /// Run cycles until `shutdown` resolves or the cycle bound is reached.
    /// Returns the number of cycles that ran. A cycle in progress is never interrupted.
    pub async fn run_until<F>(&self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        info!("Collecting feeds every {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut cycles = 0;
        loop {
            if self.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.ingestor.run_cycle().await {
                error!("Feed collection cycle failed: {}", e);
            }
            cycles += 1;
        }

        info!("Scheduler stopped after {} cycles", cycles);
        cycles
    }
}
