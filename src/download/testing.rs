// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scriptable in-memory download service for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::types::{Download, DownloadId, DownloadStatus, NewDownload};
use crate::client::DownloadService;
use crate::error::{DownloadError, Result};

#[derive(Default)]
pub struct MockService {
    records: Mutex<Vec<Download>>,
    scripts: Mutex<HashMap<DownloadId, VecDeque<Result<Download>>>>,
    calls: Mutex<Vec<String>>,
    fail_commands: AtomicBool,
    next_id: AtomicU64,
    get_delay: Mutex<Duration>,
    panics: Mutex<HashSet<DownloadId>>,
}

impl MockService {
    /// Store a record returned by `list` and by `get` once its script runs dry.
    pub fn put(&self, record: Download) {
        let mut records = self.records.lock().expect("records mutex");
        records.retain(|r| r.id != record.id);
        records.push(record);
    }

    /// Queue a `get` answer for `id`.
    pub fn script(&self, id: &str, answer: Result<Download>) {
        self.scripts
            .lock()
            .expect("scripts mutex")
            .entry(id.into())
            .or_default()
            .push_back(answer);
    }

    /// Queue a successful `get` answer with the given status.
    pub fn script_status(&self, id: &str, status: DownloadStatus) {
        let mut record = Download::new(id, format!("https://example.com/{}", id));
        record.status = status;
        self.script(id, Ok(record));
    }

    /// Hold every `get` answer back for `delay`.
    pub fn delay_gets(&self, delay: Duration) {
        *self.get_delay.lock().expect("delay mutex") = delay;
    }

    /// Make `get` for `id` panic.
    pub fn panic_on_get(&self, id: &str) {
        self.panics.lock().expect("panics mutex").insert(id.into());
    }

    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls mutex").clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn record_call(&self, call: String) {
        self.calls.lock().expect("calls mutex").push(call);
    }

    fn command(&self, name: &str, id: &DownloadId) -> Result<()> {
        self.record_call(format!("{} {}", name, id));
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(DownloadError::service(StatusCode::BAD_REQUEST, "", "rejected"));
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadService for MockService {
    async fn create(&self, request: &NewDownload) -> Result<Download> {
        self.record_call(format!("create {}", request.url));
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(DownloadError::service(StatusCode::BAD_REQUEST, "", "Failed to start download"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut record = Download::new(id, request.url.clone());
        record.file_name = request.file_name.clone().unwrap_or_else(|| "download.bin".to_string());
        record.number_of_threads = Some(request.number_of_threads.get());
        self.put(record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<Download>> {
        self.record_call("list".to_string());
        Ok(self.records.lock().expect("records mutex").clone())
    }

    async fn get(&self, id: &DownloadId) -> Result<Download> {
        self.record_call(format!("get {}", id));
        if self.panics.lock().expect("panics mutex").contains(id) {
            panic!("scripted panic in get {}", id);
        }
        let delay = *self.get_delay.lock().expect("delay mutex");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .scripts
            .lock()
            .expect("scripts mutex")
            .get_mut(id)
            .and_then(|answers| answers.pop_front());
        if let Some(answer) = scripted {
            return answer;
        }
        self.records
            .lock()
            .expect("records mutex")
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| DownloadError::service(StatusCode::NOT_FOUND, "Download task not found", ""))
    }

    async fn pause(&self, id: &DownloadId) -> Result<()> {
        self.command("pause", id)
    }

    async fn resume(&self, id: &DownloadId) -> Result<()> {
        self.command("resume", id)
    }

    async fn cancel(&self, id: &DownloadId) -> Result<()> {
        self.command("cancel", id)
    }

    async fn delete(&self, id: &DownloadId) -> Result<()> {
        self.command("delete", id)?;
        self.records.lock().expect("records mutex").retain(|r| &r.id != id);
        Ok(())
    }
}
