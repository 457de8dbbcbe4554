// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Progress polling scheduler.
//!
//! Every record in an active state (QUEUED or DOWNLOADING) gets exactly one
//! polling loop. A loop asks the service for the record on a fixed cadence and
//! merges each answer into the registry until:
//!
//! - the service reports a terminal status (merged, then the loop ends),
//! - the local record is terminal or gone (the loop ends without polling),
//! - a poll fails and the [`PollFailurePolicy`] gives up, or
//! - the scheduler is shut down.
//!
//! Loops live in an arena keyed by download id. `reconcile` re-derives the
//! active subset from a registry snapshot and only spawns loops that are
//! missing, so it is safe to call on every registry change.
//!
//! The race between a user command and an in-flight poll for the same id is
//! resolved last-merge-wins: an optimistic PAUSED may be overwritten by a
//! poll answer that left the service before the pause, and is corrected by
//! the next poll.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::registry::DownloadRegistry;
use super::types::{DownloadId, DownloadPatch, DownloadStatus};
use crate::client::DownloadService;
use crate::locks::{resilient_read, resilient_write};

/// Default delay between two polls of the same download.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Shortest accepted poll interval; shorter ones are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What a polling loop does when a poll fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PollFailurePolicy {
    /// Stop at the first failure and leave the record as last seen.
    Stall,
    /// Keep polling through failures; after `max_consecutive` failures in a
    /// row, mark the record FAILED locally and stop.
    MarkFailed { max_consecutive: u32 },
}

impl Default for PollFailurePolicy {
    fn default() -> Self {
        PollFailurePolicy::Stall
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub failure_policy: PollFailurePolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            failure_policy: PollFailurePolicy::default(),
        }
    }
}

/// Why a polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    /// Terminal status reached, remotely or locally.
    Resolved(DownloadStatus),
    /// Record no longer in the registry.
    Forgotten,
    /// Poll failed; record left as last seen.
    Stalled,
}

struct LoopHandle {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct LoopTable {
    running: HashMap<DownloadId, LoopHandle>,
    /// Ids whose loop gave up on an error; not restarted by registry changes.
    stalled: HashSet<DownloadId>,
    /// Restart requests per id. A loop whose failing poll overlaps a request
    /// keeps polling instead of stalling.
    restarts: HashMap<DownloadId, u64>,
}

impl LoopTable {
    fn restarts_of(&self, id: &DownloadId) -> u64 {
        self.restarts.get(id).copied().unwrap_or(0)
    }

    /// Drop the entry for `id` if it still belongs to `generation`.
    fn deregister(&mut self, id: &DownloadId, generation: u64) -> bool {
        if self.running.get(id).map(|handle| handle.generation) == Some(generation) {
            self.running.remove(id);
            true
        } else {
            false
        }
    }
}

/// Removes a loop's arena entry however the loop ends, panics and aborts
/// included.
struct LoopGuard {
    inner: Arc<SchedulerInner>,
    id: DownloadId,
    generation: u64,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if resilient_write(&self.inner.table).deregister(&self.id, self.generation) && std::thread::panicking() {
            tracing::error!(id = %self.id, "polling loop panicked");
        }
    }
}

struct SchedulerInner {
    service: Arc<dyn DownloadService>,
    registry: Arc<DownloadRegistry>,
    config: PollConfig,
    table: RwLock<LoopTable>,
    next_generation: AtomicU64,
    shut_down: AtomicBool,
}

/// Keeps one polling loop per active download.
///
/// Cheap to clone; clones share the same loop arena.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<SchedulerInner>,
}

impl PollScheduler {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(service: Arc<dyn DownloadService>, registry: Arc<DownloadRegistry>, mut config: PollConfig) -> Self {
        if config.interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                requested_ms = config.interval.as_millis() as u64,
                "poll interval too short, using {}ms",
                MIN_POLL_INTERVAL.as_millis()
            );
            config.interval = MIN_POLL_INTERVAL;
        }
        Self {
            inner: Arc::new(SchedulerInner {
                service,
                registry,
                config,
                table: RwLock::new(LoopTable::default()),
                next_generation: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> PollConfig {
        self.inner.config
    }

    /// Start a loop for every active record that has none.
    ///
    /// Must be called from within a tokio runtime. Returns the number of
    /// loops started.
    pub fn reconcile(&self) -> usize {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return 0;
        }

        let active: Vec<DownloadId> = self
            .inner
            .registry
            .snapshot()
            .into_iter()
            .filter(|record| record.status.is_active())
            .map(|record| record.id)
            .collect();
        if active.is_empty() {
            return 0;
        }

        let mut table = resilient_write(&self.inner.table);
        let mut started = 0;
        for id in active {
            if table.running.contains_key(&id) || table.stalled.contains(&id) {
                continue;
            }
            let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
            let task = tokio::spawn(poll_loop(self.inner.clone(), id.clone(), generation));
            tracing::debug!(%id, generation, "polling started");
            table.running.insert(id, LoopHandle { generation, task });
            started += 1;
        }
        started
    }

    /// Reconcile on every registry change until the task is aborted.
    pub async fn run(self) {
        let mut changes = self.inner.registry.subscribe();
        loop {
            let started = self.reconcile();
            if started > 0 {
                tracing::trace!(revision = self.inner.registry.revision(), started, "reconciled");
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
    }

    /// Forget a stall and poll the download again if it is still active.
    ///
    /// A loop that is running but about to stall on a poll that was in
    /// flight during this call keeps polling instead.
    pub fn restart(&self, id: &DownloadId) -> bool {
        let was_stalled = {
            let mut table = resilient_write(&self.inner.table);
            *table.restarts.entry(id.clone()).or_insert(0) += 1;
            table.stalled.remove(id)
        };
        if was_stalled {
            tracing::info!(%id, "polling restarted after stall");
        }
        self.reconcile();
        self.is_polling(id)
    }

    pub fn is_polling(&self, id: &DownloadId) -> bool {
        resilient_read(&self.inner.table).running.contains_key(id)
    }

    /// Ids with a live polling loop.
    pub fn active_loops(&self) -> Vec<DownloadId> {
        let mut ids: Vec<_> = resilient_read(&self.inner.table).running.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids whose polling stopped on an error.
    pub fn stalled(&self) -> Vec<DownloadId> {
        let mut ids: Vec<_> = resilient_read(&self.inner.table).stalled.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Undo [`shutdown`](Self::shutdown) so `reconcile` starts loops again.
    pub fn resume_scheduling(&self) {
        if self.inner.shut_down.swap(false, Ordering::SeqCst) {
            tracing::debug!("polling scheduler resumed");
        }
    }

    /// Abort every loop; later `reconcile` calls do nothing until
    /// [`resume_scheduling`](Self::resume_scheduling).
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let running: Vec<_> = resilient_write(&self.inner.table).running.drain().collect();
        for (id, handle) in running {
            handle.task.abort();
            tracing::debug!(%id, "polling aborted");
        }
    }
}

async fn poll_loop(inner: Arc<SchedulerInner>, id: DownloadId, generation: u64) {
    let _guard = LoopGuard {
        inner: inner.clone(),
        id: id.clone(),
        generation,
    };
    let period = inner.config.interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    let end = loop {
        ticker.tick().await;

        match inner.registry.get(&id) {
            None => break LoopEnd::Forgotten,
            Some(local) if local.status.is_terminal() => break LoopEnd::Resolved(local.status),
            Some(_) => {}
        }

        let restarts = resilient_read(&inner.table).restarts_of(&id);
        match inner.service.get(&id).await {
            Ok(remote) => {
                failures = 0;
                let status = remote.status;
                inner.registry.merge(&id, &DownloadPatch::from(&remote));
                tracing::debug!(
                    %id,
                    %status,
                    downloaded = remote.downloaded_bytes,
                    progress = remote.progress,
                    "poll"
                );
                if !status.is_pollable_response() {
                    break LoopEnd::Resolved(status);
                }
            }
            Err(e) => {
                failures += 1;
                match inner.config.failure_policy {
                    PollFailurePolicy::Stall => {
                        let mut table = resilient_write(&inner.table);
                        if table.restarts_of(&id) != restarts {
                            tracing::debug!(%id, "poll failed during a restart, polling on: {}", e);
                            continue;
                        }
                        // Leave the arena and mark the stall in one step, so a
                        // restart either sees the stall or is seen above.
                        table.deregister(&id, generation);
                        table.stalled.insert(id.clone());
                        tracing::warn!(%id, "poll failed, polling stopped: {}", e);
                        break LoopEnd::Stalled;
                    }
                    PollFailurePolicy::MarkFailed { max_consecutive }
                        if e.is_not_found() || failures >= max_consecutive.max(1) =>
                    {
                        tracing::warn!(%id, failures, "poll failed, marking download failed: {}", e);
                        inner.registry.merge(&id, &DownloadPatch::status(DownloadStatus::Failed));
                        break LoopEnd::Resolved(DownloadStatus::Failed);
                    }
                    PollFailurePolicy::MarkFailed { .. } => {
                        tracing::debug!(%id, failures, "poll failed: {}", e);
                    }
                }
            }
        }
    };

    match end {
        LoopEnd::Stalled => {}
        LoopEnd::Resolved(status) => tracing::info!(%id, %status, "polling finished"),
        LoopEnd::Forgotten => {
            resilient_write(&inner.table).restarts.remove(&id);
            tracing::debug!(%id, "polling dropped, record removed");
        }
    }
}
