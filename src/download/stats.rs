// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Aggregate download statistics.
//!
//! A point-in-time re-derivation from a registry snapshot: no smoothing, no
//! windowing. The aggregator keeps nothing but the last computed value.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::registry::DownloadRegistry;
use super::types::{Download, DownloadStatus};

/// Default delay between two recomputations.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(1000);

/// Shortest accepted recompute interval.
pub const MIN_STATS_INTERVAL: Duration = Duration::from_millis(10);

/// Counts and throughput over every known download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStats {
    /// QUEUED or DOWNLOADING
    pub active: usize,
    /// COMPLETED
    pub completed: usize,
    /// FAILED or CANCELLED
    pub failed: usize,
    /// Sum of speeds of DOWNLOADING records, bytes per second
    pub total_speed: f64,
}

impl DownloadStats {
    pub fn from_records(records: &[Download]) -> Self {
        records.iter().fold(Self::default(), |mut stats, record| {
            match record.status {
                DownloadStatus::Queued | DownloadStatus::Downloading => stats.active += 1,
                DownloadStatus::Completed => stats.completed += 1,
                DownloadStatus::Failed | DownloadStatus::Cancelled => stats.failed += 1,
                DownloadStatus::Paused => {}
            }
            stats.total_speed += record.effective_speed();
            stats
        })
    }

    /// Nothing left for the service to do.
    pub fn is_idle(&self) -> bool {
        self.active == 0
    }
}

/// Recomputes [`DownloadStats`] on its own cadence and publishes the result.
pub struct StatsAggregator {
    registry: Arc<DownloadRegistry>,
    interval: Duration,
    latest: watch::Sender<DownloadStats>,
}

impl StatsAggregator {
    /// Intervals below [`MIN_STATS_INTERVAL`] are raised to it.
    pub fn new(registry: Arc<DownloadRegistry>, interval: Duration) -> Self {
        if interval < MIN_STATS_INTERVAL {
            tracing::warn!(
                requested_ms = interval.as_millis() as u64,
                "stats interval too short, using {}ms",
                MIN_STATS_INTERVAL.as_millis()
            );
        }
        let interval = interval.max(MIN_STATS_INTERVAL);
        let initial = DownloadStats::from_records(&registry.snapshot());
        let (latest, _) = watch::channel(initial);
        Self {
            registry,
            interval,
            latest,
        }
    }

    /// Last computed value.
    pub fn latest(&self) -> DownloadStats {
        *self.latest.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadStats> {
        self.latest.subscribe()
    }

    /// Recompute now and publish.
    pub fn recompute(&self) -> DownloadStats {
        let stats = DownloadStats::from_records(&self.registry.snapshot());
        self.latest.send_replace(stats);
        stats
    }

    /// Recompute every interval until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let stats = self.recompute();
            tracing::trace!(
                active = stats.active,
                completed = stats.completed,
                failed = stats.failed,
                total_speed = stats.total_speed,
                "stats"
            );
        }
    }
}
