// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lifecycle command dispatcher.
//!
//! Translates a user intent into one remote call plus, on success only, an
//! optimistic local transition in the registry:
//!
//! | Command  | Valid from                   | Local effect on success |
//! |----------|------------------------------|-------------------------|
//! | create   | -                            | insert returned record  |
//! | pause    | DOWNLOADING                  | status -> PAUSED        |
//! | resume   | PAUSED                       | status -> QUEUED        |
//! | cancel   | QUEUED, DOWNLOADING, PAUSED  | status -> CANCELLED     |
//! | delete   | any                          | record removed          |
//!
//! Resume deliberately lands on QUEUED: the service requeues the transfer and
//! the next poll reports when it is actually downloading again.
//!
//! Nothing is mutated before the service confirms, so a failed command needs
//! no rollback. Commands are never retried.

use std::sync::Arc;

use super::registry::DownloadRegistry;
use super::types::{Download, DownloadId, DownloadPatch, DownloadStatus, NewDownload};
use crate::client::DownloadService;
use crate::error::{DownloadError, Result};

/// A user intent, as produced by a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadCommand {
    /// Start a new download
    Create(NewDownload),
    /// Pause a running download
    Pause(DownloadId),
    /// Resume a paused download
    Resume(DownloadId),
    /// Cancel a download that has not finished
    Cancel(DownloadId),
    /// Forget a download, whatever its status
    Delete(DownloadId),
}

impl DownloadCommand {
    /// Verb used in log lines and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            DownloadCommand::Create(_) => "create",
            DownloadCommand::Pause(_) => "pause",
            DownloadCommand::Resume(_) => "resume",
            DownloadCommand::Cancel(_) => "cancel",
            DownloadCommand::Delete(_) => "delete",
        }
    }
}

/// What a successful command did locally.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Created(Download),
    /// Status applied optimistically; `applied` is false if the id was not
    /// in the registry.
    Transitioned {
        id: DownloadId,
        status: DownloadStatus,
        applied: bool,
    },
    Deleted(DownloadId),
}

/// Issues lifecycle commands and applies their optimistic transitions.
#[derive(Clone)]
pub struct CommandDispatcher {
    service: Arc<dyn DownloadService>,
    registry: Arc<DownloadRegistry>,
}

impl CommandDispatcher {
    pub fn new(service: Arc<dyn DownloadService>, registry: Arc<DownloadRegistry>) -> Self {
        Self { service, registry }
    }

    /// Run any command.
    pub async fn dispatch(&self, command: DownloadCommand) -> Result<CommandOutcome> {
        match command {
            DownloadCommand::Create(request) => self.create(request).await.map(CommandOutcome::Created),
            DownloadCommand::Pause(id) => self.pause(&id).await,
            DownloadCommand::Resume(id) => self.resume(&id).await,
            DownloadCommand::Cancel(id) => self.cancel(&id).await,
            DownloadCommand::Delete(id) => self.delete(&id).await.map(|_| CommandOutcome::Deleted(id)),
        }
    }

    /// Create a download and insert the record the service returns.
    pub async fn create(&self, request: NewDownload) -> Result<Download> {
        request.validate()?;

        match self.service.create(&request).await {
            Ok(record) => {
                tracing::info!(id = %record.id, url = %record.url, status = %record.status, "download created");
                self.registry.insert(record.clone());
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(url = %request.url, "create failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn pause(&self, id: &DownloadId) -> Result<CommandOutcome> {
        self.check(id, "pause", DownloadStatus::can_pause)?;
        let result = self.service.pause(id).await;
        self.transition(id, "pause", result, DownloadStatus::Paused)
    }

    pub async fn resume(&self, id: &DownloadId) -> Result<CommandOutcome> {
        self.check(id, "resume", DownloadStatus::can_resume)?;
        let result = self.service.resume(id).await;
        self.transition(id, "resume", result, DownloadStatus::Queued)
    }

    pub async fn cancel(&self, id: &DownloadId) -> Result<CommandOutcome> {
        self.check(id, "cancel", DownloadStatus::can_cancel)?;
        let result = self.service.cancel(id).await;
        self.transition(id, "cancel", result, DownloadStatus::Cancelled)
    }

    /// Delete a download; allowed from any status.
    pub async fn delete(&self, id: &DownloadId) -> Result<()> {
        match self.service.delete(id).await {
            Ok(()) => {
                self.registry.remove(id);
                tracing::info!(%id, "download deleted");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%id, "delete failed: {}", e);
                Err(e)
            }
        }
    }

    /// Load the service's list, inserting records we do not know yet.
    ///
    /// Known records are left alone; their pollers own their updates.
    pub async fn refresh(&self) -> Result<usize> {
        let remote = self.service.list().await.map_err(|e| {
            tracing::warn!("list failed: {}", e);
            e
        })?;

        let mut added = 0;
        for record in remote {
            if self.registry.insert_if_absent(record) {
                added += 1;
            }
        }
        tracing::debug!(added, total = self.registry.len(), "registry refreshed");
        Ok(added)
    }

    /// Reject the command locally if the known status does not allow it.
    fn check(&self, id: &DownloadId, command: &'static str, allowed: fn(&DownloadStatus) -> bool) -> Result<()> {
        match self.registry.get(id) {
            Some(record) if !allowed(&record.status) => Err(DownloadError::InvalidTransition {
                command,
                id: id.to_string(),
                status: record.status,
            }),
            _ => Ok(()),
        }
    }

    fn transition(
        &self,
        id: &DownloadId,
        command: &'static str,
        result: Result<()>,
        status: DownloadStatus,
    ) -> Result<CommandOutcome> {
        if let Err(e) = result {
            tracing::warn!(%id, "{} failed: {}", command, e);
            return Err(e);
        }

        let applied = self.registry.merge(id, &DownloadPatch::status(status));
        tracing::info!(%id, %status, applied, "{} accepted", command);
        Ok(CommandOutcome::Transitioned {
            id: id.clone(),
            status,
            applied,
        })
    }
}
