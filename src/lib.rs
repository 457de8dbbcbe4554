// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! dlsync - client-side orchestrator for a remote download service
//!
//! The service does the downloading. dlsync keeps a local picture of every
//! download in sync with it, issues lifecycle commands and aggregates stats:
//!
//! **Command** -> **Service** -> **Registry** <- **Poller**
//!
//! # Core Modules
//!
//! - [`client`] - HTTP client for the download service
//! - [`download`] - Registry, command dispatcher, polling scheduler, stats
//! - [`display`] - Byte/speed formatting and colored status lines
//! - [`config`] - `~/.dlsync/config.json` loading and overrides
//! - [`logging`] - tracing subscriber setup
//! - [`error`] - Error type and actionable error formatting

pub mod client;
pub mod config;
pub mod display;
pub mod download;
pub mod error;
pub mod locks;
pub mod logging;

pub use client::{DownloadService, HttpDownloadService, DEFAULT_SERVICE_URL};
pub use config::Config;
pub use download::{
    CommandOutcome, Download, DownloadCommand, DownloadId, DownloadManager, DownloadPatch,
    DownloadRegistry, DownloadStats, DownloadStatus, ManagerConfig, NewDownload, PollConfig,
    PollFailurePolicy, ThreadCount,
};
pub use error::{DownloadError, Result};
