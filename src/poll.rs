//! Fixed-interval supervisor around [`run_cycle`].
//!
//! A failed cycle is logged and abandoned; the loop always sleeps and tries
//! again. There is no backoff and no terminal state.

use std::time::Duration;

use crate::history_db::HistoryDb;
use crate::service::PlayFeed;
use crate::sync::{run_cycle, CycleReport};

/// How one cycle ended, as seen by the loop
#[derive(Debug)]
pub enum CycleOutcome {
    Synced(CycleReport),
    /// Anything the cycle raised: feed, transport or store errors
    Failed(anyhow::Error),
}

impl CycleOutcome {
    #[cfg(test)]
    pub(crate) fn is_synced(&self) -> bool {
        matches!(self, CycleOutcome::Synced(_))
    }
}

pub struct Poller<F: PlayFeed> {
    feed: F,
    db: HistoryDb,
    interval: Duration,
    cycles: u64,
}

impl<F: PlayFeed> Poller<F> {
    pub fn new(feed: F, db: HistoryDb, interval: Duration) -> Self {
        Self {
            feed,
            db,
            interval,
            cycles: 0,
        }
    }

    /// Run a single cycle and classify the result.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        self.cycles += 1;
        match run_cycle(&mut self.feed, &mut self.db).await {
            Ok(report) => CycleOutcome::Synced(report),
            Err(e) => CycleOutcome::Failed(e),
        }
    }

    /// Poll forever. Only process termination ends this future.
    pub async fn run(&mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Polling recently played");
        loop {
            match self.poll_once().await {
                CycleOutcome::Synced(report) => {
                    tracing::debug!(cycle = self.cycles, inserted = report.inserted, "Cycle finished");
                }
                CycleOutcome::Failed(e) => {
                    tracing::error!(cycle = self.cycles, "Sync cycle failed, retrying next interval: {:#}", e);
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    #[cfg(test)]
    pub(crate) fn cycles(&self) -> u64 {
        self.cycles
    }

    #[cfg(test)]
    pub(crate) fn db(&self) -> &HistoryDb {
        &self.db
    }

    #[cfg(test)]
    pub(crate) fn feed_mut(&mut self) -> &mut F {
        &mut self.feed
    }

    /// Hand back the store so the caller can close it
    pub fn into_db(self) -> HistoryDb {
        self.db
    }
}
