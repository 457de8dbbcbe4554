// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for dlsync.
//!
//! [`DownloadError`] is the single error type of the library. Every failure in
//! this crate is local and recoverable: a rejected command leaves the registry
//! untouched, a failed poll ends one polling loop.
//!
//! [`format_error`] renders actionable messages for the CLI, with possible
//! causes and suggested fixes.

use reqwest::StatusCode;
use thiserror::Error;

use crate::download::types::DownloadStatus;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Errors surfaced by the download service client and the command dispatcher.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Input rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// Command not valid for the record's current status.
    #[error("cannot {command} download {id} while it is {status}")]
    InvalidTransition {
        command: &'static str,
        id: String,
        status: DownloadStatus,
    },

    /// The service could not be reached at all.
    #[error("cannot connect to the download service at {0}")]
    Unreachable(String),

    /// The request did not complete in time.
    #[error("request to the download service timed out: {0}")]
    Timeout(String),

    /// The service answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Service { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("unexpected response from the download service: {0}")]
    Decode(String),

    /// Any other transport-level failure.
    #[error("network error: {0}")]
    Transport(String),
}

impl DownloadError {
    /// Build a service error from an HTTP status and the response body.
    ///
    /// The service replies with a plain-text reason; an empty body falls back
    /// to the per-operation default message.
    pub fn service(status: StatusCode, body: &str, fallback: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() { fallback.to_string() } else { body.to_string() };
        DownloadError::Service { status: status.as_u16(), message }
    }

    /// Convert a reqwest error, keeping the base URL for connect failures.
    pub fn from_reqwest(err: reqwest::Error, base_url: &str) -> Self {
        if err.is_connect() {
            DownloadError::Unreachable(base_url.to_string())
        } else if err.is_timeout() {
            DownloadError::Timeout(err.to_string())
        } else if err.is_decode() {
            DownloadError::Decode(err.to_string())
        } else {
            DownloadError::Transport(err.to_string())
        }
    }

    /// Network-level failures that may succeed if simply tried again.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Unreachable(_) | DownloadError::Timeout(_) | DownloadError::Transport(_) => true,
            DownloadError::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// True if the service reported the download as unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DownloadError::Service { status: 404, .. })
    }
}

/// Formats an error message with title, causes and fixes.
///
/// # Example
///
/// ```
/// use dlsync::error::format_error;
///
/// let error = format_error(
///     "Cannot reach the download service",
///     &["The service is not running"],
///     &["Check the URL: dlsync config show"],
/// );
/// assert!(error.contains("Possible causes:"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n", title);

    if !causes.is_empty() {
        output.push_str("\nPossible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
    }

    if !fixes.is_empty() {
        output.push_str("\nTry these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
    }

    output
}

/// Render a library error for the terminal, adding hints where we have them.
pub fn describe(err: &DownloadError) -> String {
    match err {
        DownloadError::Unreachable(url) => format_error(
            &format!("Cannot reach the download service at {}", url),
            &[
                "The download service is not running",
                "The service URL is wrong",
                "A firewall is blocking the connection",
            ],
            &[
                "Check the configured URL: dlsync config show",
                "Point dlsync at the service: dlsync --url http://host:port/api <command>",
            ],
        ),
        DownloadError::Timeout(_) => format_error(
            &err.to_string(),
            &["The service is overloaded", "The network is slow"],
            &["Raise request_timeout_secs in ~/.dlsync/config.json"],
        ),
        DownloadError::Validation(_) | DownloadError::InvalidTransition { .. } => {
            format_error(&err.to_string(), &[], &[])
        }
        _ => format_error(&err.to_string(), &[], &["Re-run with --verbose for details"]),
    }
}
