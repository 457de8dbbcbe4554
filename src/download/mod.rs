// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client-side download tracking for dlsync
//!
//! This module mirrors the downloads of a remote download service with:
//! - One local registry of records, in creation order
//! - Lifecycle commands with optimistic local transitions
//! - One polling loop per active download
//! - Periodic aggregate stats
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ DownloadManager │────▶│ CommandDispatcher│──┐
//! │                 │     └─────────────────┘  │
//! │                 │     ┌─────────────────┐  │   ┌─────────────────┐
//! │                 │────▶│ PollScheduler   │──┼──▶│ DownloadService │
//! │                 │     └────────┬────────┘  │   │ (HTTP)          │
//! │                 │     ┌────────▼────────┐  │   └─────────────────┘
//! │                 │────▶│ DownloadRegistry│◀─┘
//! │                 │     └────────▲────────┘
//! │                 │     ┌────────┴────────┐
//! │                 │────▶│ StatsAggregator │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dlsync::client::HttpDownloadService;
//! use dlsync::download::{DownloadManager, ManagerConfig, NewDownload};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = Arc::new(HttpDownloadService::new("http://localhost:8086/api")?);
//! let manager = DownloadManager::new(service, ManagerConfig::default());
//! manager.start();
//!
//! let created = manager.create(NewDownload::new("https://example.com/file.iso")).await?;
//! let finished = manager.wait(&created.id).await;
//! println!("{:?}", finished.map(|d| d.status));
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod types;

#[cfg(test)]
mod testing;

pub use dispatcher::{CommandDispatcher, CommandOutcome, DownloadCommand};
pub use manager::{DownloadManager, ManagerConfig};
pub use registry::DownloadRegistry;
pub use scheduler::{PollConfig, PollFailurePolicy, PollScheduler, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};
pub use stats::{DownloadStats, StatsAggregator, DEFAULT_STATS_INTERVAL, MIN_STATS_INTERVAL};
pub use types::{Download, DownloadId, DownloadPatch, DownloadStatus, NewDownload, ThreadCount};
