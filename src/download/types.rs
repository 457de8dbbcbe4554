// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download types shared by the client, registry and polling scheduler.

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DownloadError;

/// Identifier assigned by the download service on creation.
///
/// The service issues numeric ids; we keep them opaque and only ever use them
/// as map keys and URL path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DownloadId(String);

impl DownloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DownloadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for DownloadId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl Serialize for DownloadId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DownloadId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Unsigned(u64),
            Signed(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Unsigned(n) => DownloadId(n.to_string()),
            RawId::Signed(n) => DownloadId(n.to_string()),
            RawId::Text(s) => DownloadId(s),
        })
    }
}

/// Status of a download as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    /// Waiting for a worker on the service side
    Queued,
    /// Transfer in progress
    Downloading,
    /// Paused by user
    Paused,
    /// Successfully completed
    Completed,
    /// Failed on the service side
    Failed,
    /// Cancelled by user
    Cancelled,
}

impl DownloadStatus {
    /// Statuses eligible for polling: the service is still working on it.
    pub fn is_active(&self) -> bool {
        matches!(self, DownloadStatus::Queued | DownloadStatus::Downloading)
    }

    /// Returns true if the download will never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }

    /// A poll answer with this status keeps the loop going. PAUSED counts:
    /// the service may requeue it without telling us.
    pub fn is_pollable_response(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, DownloadStatus::Downloading)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, DownloadStatus::Paused)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Queued | DownloadStatus::Downloading | DownloadStatus::Paused
        )
    }

    /// Wire name, e.g. `DOWNLOADING`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "QUEUED",
            DownloadStatus::Downloading => "DOWNLOADING",
            DownloadStatus::Paused => "PAUSED",
            DownloadStatus::Completed => "COMPLETED",
            DownloadStatus::Failed => "FAILED",
            DownloadStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concurrency hint sent to the service on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ThreadCount {
    One,
    Two,
    Four,
    Eight,
    Sixteen,
}

impl ThreadCount {
    /// Every accepted value, smallest first.
    pub const ALLOWED: [u32; 5] = [1, 2, 4, 8, 16];

    pub fn get(self) -> u32 {
        match self {
            ThreadCount::One => 1,
            ThreadCount::Two => 2,
            ThreadCount::Four => 4,
            ThreadCount::Eight => 8,
            ThreadCount::Sixteen => 16,
        }
    }
}

impl Default for ThreadCount {
    fn default() -> Self {
        ThreadCount::Four
    }
}

impl TryFrom<u32> for ThreadCount {
    type Error = DownloadError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ThreadCount::One),
            2 => Ok(ThreadCount::Two),
            4 => Ok(ThreadCount::Four),
            8 => Ok(ThreadCount::Eight),
            16 => Ok(ThreadCount::Sixteen),
            other => Err(DownloadError::Validation(format!(
                "number of threads must be one of 1, 2, 4, 8, 16 (got {})",
                other
            ))),
        }
    }
}

impl From<ThreadCount> for u32 {
    fn from(count: ThreadCount) -> Self {
        count.get()
    }
}

impl fmt::Display for ThreadCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// A download record as tracked locally.
///
/// Field values are server-driven; the only local writes are the optimistic
/// status transitions applied by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub id: DownloadId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub file_name: String,
    /// Only the create response carries this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_threads: Option<u32>,
    pub status: DownloadStatus,
    #[serde(default)]
    pub downloaded_bytes: u64,
    /// `None` until the service knows the size.
    #[serde(default, deserialize_with = "de_file_size")]
    pub file_size: Option<u64>,
    /// Bytes per second.
    #[serde(default)]
    pub download_speed: f64,
    /// Percentage in [0, 100].
    #[serde(default)]
    pub progress: f64,
    #[serde(default, deserialize_with = "de_timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "de_timestamp", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<NaiveDateTime>,
}

impl Download {
    /// Create a fresh queued record, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<DownloadId>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            file_name: String::new(),
            number_of_threads: None,
            status: DownloadStatus::Queued,
            downloaded_bytes: 0,
            file_size: None,
            download_speed: 0.0,
            progress: 0.0,
            created_at: None,
            completed_at: None,
        }
    }

    /// Speed that counts towards throughput: zero unless downloading.
    pub fn effective_speed(&self) -> f64 {
        if self.status == DownloadStatus::Downloading && self.download_speed.is_finite() {
            self.download_speed.max(0.0)
        } else {
            0.0
        }
    }

    /// Clamp fields into their documented ranges.
    pub fn normalize(&mut self) {
        if let Some(size) = self.file_size {
            self.downloaded_bytes = self.downloaded_bytes.min(size);
        }
        self.progress = if self.progress.is_finite() { self.progress.clamp(0.0, 100.0) } else { 0.0 };
        if !self.download_speed.is_finite() || self.download_speed < 0.0 {
            self.download_speed = 0.0;
        }
    }

    /// Overwrite the fields named in `patch`.
    pub fn apply(&mut self, patch: &DownloadPatch) {
        if let Some(name) = &patch.file_name {
            self.file_name = name.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(bytes) = patch.downloaded_bytes {
            self.downloaded_bytes = bytes;
        }
        if let Some(size) = patch.file_size {
            self.file_size = Some(size);
        }
        if let Some(speed) = patch.download_speed {
            self.download_speed = speed;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(at) = patch.completed_at {
            self.completed_at = Some(at);
        }
        self.normalize();
    }
}

/// Partial field set merged into an existing record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadPatch {
    pub file_name: Option<String>,
    pub status: Option<DownloadStatus>,
    pub downloaded_bytes: Option<u64>,
    pub file_size: Option<u64>,
    pub download_speed: Option<f64>,
    pub progress: Option<f64>,
    pub completed_at: Option<NaiveDateTime>,
}

impl DownloadPatch {
    /// Optimistic status-only transition.
    pub fn status(status: DownloadStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

impl From<&Download> for DownloadPatch {
    /// Reconciliation patch: every server-driven field from a full record.
    fn from(record: &Download) -> Self {
        Self {
            file_name: if record.file_name.is_empty() { None } else { Some(record.file_name.clone()) },
            status: Some(record.status),
            downloaded_bytes: Some(record.downloaded_bytes),
            file_size: record.file_size,
            download_speed: Some(record.download_speed),
            progress: Some(record.progress),
            completed_at: record.completed_at,
        }
    }
}

/// Parameters for a new download, as entered by the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDownload {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub number_of_threads: ThreadCount,
}

impl NewDownload {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: None,
            number_of_threads: ThreadCount::default(),
        }
    }

    /// Set a custom file name; blank names are dropped so the service picks one.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.file_name = if name.trim().is_empty() { None } else { Some(name) };
        self
    }

    pub fn with_threads(mut self, threads: ThreadCount) -> Self {
        self.number_of_threads = threads;
        self
    }

    /// Only the URL is checked here; everything else is up to the service.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::Validation("URL is required".to_string()));
        }
        Ok(())
    }
}

/// The service reports an unknown size as 0 or -1.
fn de_file_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.and_then(|n| u64::try_from(n).ok()).filter(|n| *n > 0))
}

/// Accept ISO-8601 strings with or without an offset; anything else is dropped.
fn de_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let text = match raw {
        Some(serde_json::Value::String(s)) => s,
        _ => return Ok(None),
    };
    if let Ok(at) = text.parse::<NaiveDateTime>() {
        return Ok(Some(at));
    }
    Ok(DateTime::parse_from_rfc3339(&text).ok().map(|at| at.naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(DownloadStatus::Queued.is_active());
        assert!(DownloadStatus::Downloading.is_active());
        assert!(!DownloadStatus::Paused.is_active());
        assert!(!DownloadStatus::Paused.is_terminal());

        for status in [DownloadStatus::Completed, DownloadStatus::Failed, DownloadStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
            assert!(!status.can_cancel());
        }

        assert!(DownloadStatus::Downloading.can_pause());
        assert!(!DownloadStatus::Queued.can_pause());
        assert!(DownloadStatus::Paused.can_resume());
        assert!(!DownloadStatus::Downloading.can_resume());
    }

    #[test]
    fn test_pollable_response_is_anything_non_terminal() {
        for status in [DownloadStatus::Queued, DownloadStatus::Downloading, DownloadStatus::Paused] {
            assert!(status.is_pollable_response(), "{status} should keep polling");
        }
        for status in [DownloadStatus::Completed, DownloadStatus::Failed, DownloadStatus::Cancelled] {
            assert!(!status.is_pollable_response(), "{status} should end polling");
        }
    }

    #[test]
    fn test_thread_count() {
        for n in ThreadCount::ALLOWED {
            assert_eq!(ThreadCount::try_from(n).unwrap().get(), n);
        }
        assert!(ThreadCount::try_from(3).is_err());
        assert!(ThreadCount::try_from(0).is_err());
        assert_eq!(ThreadCount::default().get(), 4);
    }

    #[test]
    fn test_parse_progress_response() {
        let json = r#"{
            "id": 7,
            "fileName": "ubuntu.iso",
            "url": "https://example.com/ubuntu.iso",
            "fileSize": 1000,
            "downloadedBytes": 250,
            "progress": 25.0,
            "downloadSpeed": 512.5,
            "status": "DOWNLOADING",
            "createdAt": "2024-03-01T10:15:30.123",
            "completedAt": null
        }"#;

        let record: Download = serde_json::from_str(json).unwrap();
        assert_eq!(record.id.as_str(), "7");
        assert_eq!(record.status, DownloadStatus::Downloading);
        assert_eq!(record.file_size, Some(1000));
        assert_eq!(record.number_of_threads, None);
        assert!(record.created_at.is_some());
        assert!(record.completed_at.is_none());
        assert_eq!(record.effective_speed(), 512.5);
    }

    #[test]
    fn test_parse_create_response() {
        // The create endpoint returns the raw task: no progress, has threads.
        let json = r#"{
            "id": 3,
            "url": "https://example.com/a.zip",
            "fileName": "a.zip",
            "filePath": "/srv/downloads/a.zip",
            "fileSize": -1,
            "downloadedBytes": 0,
            "status": "QUEUED",
            "numberOfThreads": 8,
            "downloadSpeed": 0.0
        }"#;

        let record: Download = serde_json::from_str(json).unwrap();
        assert_eq!(record.number_of_threads, Some(8));
        assert_eq!(record.file_size, None);
        assert_eq!(record.progress, 0.0);
    }

    #[test]
    fn test_effective_speed_zero_unless_downloading() {
        let mut record = Download::new("1", "u");
        record.download_speed = 1000.0;
        record.status = DownloadStatus::Paused;
        assert_eq!(record.effective_speed(), 0.0);
    }

    #[test]
    fn test_apply_clamps_downloaded_bytes() {
        let mut record = Download::new("1", "u");
        record.file_size = Some(100);
        record.apply(&DownloadPatch {
            downloaded_bytes: Some(150),
            progress: Some(150.0),
            ..DownloadPatch::default()
        });
        assert_eq!(record.downloaded_bytes, 100);
        assert_eq!(record.progress, 100.0);
    }

    #[test]
    fn test_reconcile_patch_keeps_known_size() {
        let mut local = Download::new("1", "u");
        local.file_size = Some(4096);

        let mut remote = Download::new("1", "u");
        remote.status = DownloadStatus::Downloading;
        remote.downloaded_bytes = 1024;

        local.apply(&DownloadPatch::from(&remote));
        assert_eq!(local.file_size, Some(4096));
        assert_eq!(local.downloaded_bytes, 1024);
        assert_eq!(local.status, DownloadStatus::Downloading);
    }

    #[test]
    fn test_new_download_validation() {
        assert!(NewDownload::new("   ").validate().is_err());
        assert!(NewDownload::new("https://example.com/f").validate().is_ok());

        let request = NewDownload::new("https://example.com/f").with_file_name("  ");
        assert_eq!(request.file_name, None);
    }

    #[test]
    fn test_new_download_wire_format() {
        let request = NewDownload::new("https://example.com/f").with_threads(ThreadCount::Sixteen);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["url"], "https://example.com/f");
        assert_eq!(json["numberOfThreads"], 16);
        assert!(json.get("fileName").is_none());
    }
}
