// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory registry of known downloads.
//!
//! The registry is the single owner of every [`Download`] record. The
//! dispatcher and the polling scheduler only propose merges into it. It does
//! no validation beyond identifier presence; field-level invariants belong to
//! the download service.
//!
//! Every mutation bumps a revision counter published on a `watch` channel, so
//! interested parties (the polling scheduler) can react to changes without
//! being called explicitly.

use std::sync::RwLock;

use indexmap::map::Entry;
use indexmap::IndexMap;
use tokio::sync::watch;

use super::types::{Download, DownloadId, DownloadPatch};
use crate::locks::{resilient_read, resilient_write};

/// Insertion-ordered store of download records.
#[derive(Debug)]
pub struct DownloadRegistry {
    records: RwLock<IndexMap<DownloadId, Download>>,
    revision: watch::Sender<u64>,
}

impl Default for DownloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            records: RwLock::new(IndexMap::new()),
            revision,
        }
    }

    /// Insert a record.
    ///
    /// Returns `true` if the id was new. A record with a known id replaces
    /// the old one in place, so ids stay unique and order is kept.
    pub fn insert(&self, mut record: Download) -> bool {
        record.normalize();
        let is_new = {
            let mut records = resilient_write(&self.records);
            records.insert(record.id.clone(), record).is_none()
        };
        self.bump();
        is_new
    }

    /// Insert a record only if its id is unknown.
    ///
    /// The check and the insert happen under one write lock, so a record
    /// inserted concurrently is never overwritten. Returns `true` if inserted.
    pub fn insert_if_absent(&self, mut record: Download) -> bool {
        record.normalize();
        let inserted = match resilient_write(&self.records).entry(record.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
            Entry::Occupied(_) => false,
        };
        if inserted {
            self.bump();
        }
        inserted
    }

    /// Shallow-merge `patch` into the record with `id`.
    ///
    /// Returns `false` (and changes nothing) if the id is absent.
    pub fn merge(&self, id: &DownloadId, patch: &DownloadPatch) -> bool {
        let merged = {
            let mut records = resilient_write(&self.records);
            match records.get_mut(id) {
                Some(record) => {
                    record.apply(patch);
                    true
                }
                None => false,
            }
        };
        if merged {
            self.bump();
        }
        merged
    }

    /// Remove a record, keeping the order of the others.
    pub fn remove(&self, id: &DownloadId) -> Option<Download> {
        let removed = resilient_write(&self.records).shift_remove(id);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Immutable copy of every record, in insertion order.
    pub fn snapshot(&self) -> Vec<Download> {
        resilient_read(&self.records).values().cloned().collect()
    }

    pub fn get(&self, id: &DownloadId) -> Option<Download> {
        resilient_read(&self.records).get(id).cloned()
    }

    pub fn contains(&self, id: &DownloadId) -> bool {
        resilient_read(&self.records).contains_key(id)
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of mutations applied so far.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver that is notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}
