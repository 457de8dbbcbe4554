// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download manager: the single owner of the registry.
//!
//! Wires the command dispatcher, the polling scheduler and the stats
//! aggregator around one [`DownloadRegistry`] and exposes what a presentation
//! layer needs: live snapshots, aggregate stats and one callback per
//! lifecycle command.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::dispatcher::{CommandDispatcher, CommandOutcome, DownloadCommand};
use super::registry::DownloadRegistry;
use super::scheduler::{PollConfig, PollScheduler};
use super::stats::{DownloadStats, StatsAggregator, DEFAULT_STATS_INTERVAL};
use super::types::{Download, DownloadId, NewDownload};
use crate::client::DownloadService;
use crate::error::Result;
use crate::locks::resilient_write;

/// Cadences used by the manager's background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub poll: PollConfig,
    pub stats_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

/// Coordinator for client-side download tracking.
///
/// Call [`start`](Self::start) from within a tokio runtime to begin polling
/// and stats aggregation; [`shutdown`](Self::shutdown) (or dropping the
/// manager) tears both down.
pub struct DownloadManager {
    registry: Arc<DownloadRegistry>,
    dispatcher: CommandDispatcher,
    scheduler: PollScheduler,
    stats: Arc<StatsAggregator>,
    /// Scheduler watcher and stats ticker, once started
    background: RwLock<Vec<JoinHandle<()>>>,
}

impl DownloadManager {
    pub fn new(service: Arc<dyn DownloadService>, config: ManagerConfig) -> Self {
        let registry = Arc::new(DownloadRegistry::new());
        let dispatcher = CommandDispatcher::new(service.clone(), registry.clone());
        let scheduler = PollScheduler::new(service, registry.clone(), config.poll);
        let stats = Arc::new(StatsAggregator::new(registry.clone(), config.stats_interval));

        Self {
            registry,
            dispatcher,
            scheduler,
            stats,
            background: RwLock::new(Vec::new()),
        }
    }

    /// Spawn the scheduler watcher and the stats ticker. Idempotent, and
    /// starts polling again after a [`shutdown`](Self::shutdown).
    pub fn start(&self) {
        let mut background = resilient_write(&self.background);
        if !background.is_empty() {
            return;
        }
        self.scheduler.resume_scheduling();
        background.push(tokio::spawn(self.scheduler.clone().run()));
        background.push(tokio::spawn(self.stats.clone().run()));
        tracing::debug!("download manager started");
    }

    /// Stop background tasks and abort every polling loop.
    pub fn shutdown(&self) {
        for task in resilient_write(&self.background).drain(..) {
            task.abort();
        }
        self.scheduler.shutdown();
        tracing::debug!("download manager stopped");
    }

    pub fn registry(&self) -> &Arc<DownloadRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// Current records in insertion order.
    pub fn snapshot(&self) -> Vec<Download> {
        self.registry.snapshot()
    }

    /// Stats as of the last aggregation tick.
    pub fn stats(&self) -> DownloadStats {
        self.stats.latest()
    }

    /// Recompute stats right away instead of waiting for the next tick.
    pub fn recompute_stats(&self) -> DownloadStats {
        self.stats.recompute()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<DownloadStats> {
        self.stats.subscribe()
    }

    pub async fn dispatch(&self, command: DownloadCommand) -> Result<CommandOutcome> {
        let resumed = match &command {
            DownloadCommand::Resume(id) => Some(id.clone()),
            _ => None,
        };
        let outcome = self.dispatcher.dispatch(command).await?;
        if let Some(id) = resumed {
            self.unstall(&id);
        }
        Ok(outcome)
    }

    pub async fn create(&self, request: NewDownload) -> Result<Download> {
        self.dispatcher.create(request).await
    }

    pub async fn pause(&self, id: &DownloadId) -> Result<CommandOutcome> {
        self.dispatcher.pause(id).await
    }

    /// A successful resume also forgets a previous polling stall, so the
    /// requeued record is polled again.
    pub async fn resume(&self, id: &DownloadId) -> Result<CommandOutcome> {
        let outcome = self.dispatcher.resume(id).await?;
        self.unstall(id);
        Ok(outcome)
    }

    pub async fn cancel(&self, id: &DownloadId) -> Result<CommandOutcome> {
        self.dispatcher.cancel(id).await
    }

    pub async fn delete(&self, id: &DownloadId) -> Result<()> {
        self.dispatcher.delete(id).await
    }

    /// Pull records the service knows about but we do not.
    pub async fn refresh(&self) -> Result<usize> {
        self.dispatcher.refresh().await
    }

    /// Poll a stalled download again.
    pub fn restart_polling(&self, id: &DownloadId) -> bool {
        self.scheduler.restart(id)
    }

    pub fn stalled(&self) -> Vec<DownloadId> {
        self.scheduler.stalled()
    }

    /// Restart unconditionally: a loop that is stalling right now only
    /// notices the request through `restart`.
    fn unstall(&self, id: &DownloadId) {
        self.scheduler.restart(id);
    }

    /// Wait until the record is terminal or gone.
    ///
    /// Returns the final record, or `None` if it was removed. Also returns
    /// early if polling for it stalls, since nothing would wake us then.
    pub async fn wait(&self, id: &DownloadId) -> Option<Download> {
        let mut changes = self.registry.subscribe();
        loop {
            match self.registry.get(id) {
                None => return None,
                Some(record) if record.status.is_terminal() => return Some(record),
                Some(record) if self.scheduler.stalled().contains(id) => return Some(record),
                Some(_) => {}
            }
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return self.registry.get(id);
                    }
                }
                // Stalls do not touch the registry; re-check on the poll cadence.
                _ = tokio::time::sleep(self.scheduler.config().interval) => {}
            }
        }
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
