//! crates/custodyx_core/src/migration.rs
//!
//! Moves records kept on the device into the remote store under a newly
//! authenticated user, and drives the state machine the UI renders while it
//! happens.
//!
//! Writes are upserts keyed by the record id, which is preserved from the
//! device to the remote row. Re-running a migration after a partial failure
//! therefore re-applies the same rows without duplicating them, so nothing is
//! rolled back when a later collection fails.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::{
    DocumentRow, LocalSnapshot, ReportRow, SnapshotSummary, TemplateRow, UserId, UserRow,
};
use crate::ports::{OrderBy, PortError, Table};
use crate::remote::{RemoteClient, RemoteError};
use crate::snapshot::SnapshotReader;

/// Conflict column for every migrated table.
const ID_COLUMN: &str = "id";

//=========================================================================================
// DataMigrationService
//=========================================================================================

/// Why records could not be pulled onto the device.
#[derive(Debug, thiserror::Error)]
pub enum HydrateError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Failed to write local storage: {0}")]
    Local(#[from] PortError),
}

#[derive(Clone)]
pub struct DataMigrationService {
    reader: SnapshotReader,
    remote: RemoteClient,
}

impl DataMigrationService {
    pub fn new(reader: SnapshotReader, remote: RemoteClient) -> Self {
        Self { reader, remote }
    }

    pub fn reader(&self) -> &SnapshotReader {
        &self.reader
    }

    /// Copies the local snapshot to the remote store for `user_id`.
    ///
    /// Collections are written one after another (reports, documents, templates)
    /// so a failure always names the collection that stopped. Local storage is
    /// left untouched either way; clearing it is the caller's decision.
    pub async fn migrate(&self, user_id: UserId) -> Result<SnapshotSummary, RemoteError> {
        let snapshot = self.reader.read_snapshot();
        let summary = snapshot.summary();
        info!(
            %user_id,
            reports = summary.reports,
            documents = summary.documents,
            templates = summary.templates,
            "Starting migration of local data."
        );

        let result = self.write_snapshot(snapshot, user_id).await;
        match &result {
            Ok(()) => info!(%user_id, "Migration finished."),
            Err(e) => error!(%user_id, "Migration error: {}", e),
        }
        result.map(|()| summary)
    }

    async fn write_snapshot(&self, snapshot: LocalSnapshot, user_id: UserId) -> Result<(), RemoteError> {
        if !snapshot.reports.is_empty() {
            let rows: Vec<ReportRow> = snapshot
                .reports
                .into_iter()
                .map(|report| ReportRow::from_local(report, user_id))
                .collect();
            self.remote.write(Table::Reports, &rows, ID_COLUMN).await?;
        }

        if !snapshot.documents.is_empty() {
            let rows: Vec<DocumentRow> = snapshot
                .documents
                .into_iter()
                .map(|document| DocumentRow::from_local(document, user_id))
                .collect();
            self.remote.write(Table::Documents, &rows, ID_COLUMN).await?;
        }

        if !snapshot.incident_templates.is_empty() {
            let now = Utc::now();
            let rows: Vec<TemplateRow> = snapshot
                .incident_templates
                .into_iter()
                .map(|template| TemplateRow::from_local(template, user_id, now))
                .collect();
            self.remote.write(Table::IncidentTemplates, &rows, ID_COLUMN).await?;
        }

        Ok(())
    }

    /// Everything `user_id` owns remotely, in the device shape, newest first.
    pub async fn try_load_from_remote(&self, user_id: UserId) -> Result<LocalSnapshot, RemoteError> {
        let newest_first = || Some(OrderBy::newest_first("created_at"));

        let reports: Vec<ReportRow> = self
            .remote
            .read_all_for_owner(Table::Reports, user_id, newest_first())
            .await?;
        let documents: Vec<DocumentRow> = self
            .remote
            .read_all_for_owner(Table::Documents, user_id, newest_first())
            .await?;
        let templates: Vec<TemplateRow> = self
            .remote
            .read_all_for_owner(Table::IncidentTemplates, user_id, newest_first())
            .await?;
        let profile: Option<UserRow> = self.remote.read_one(Table::Users, user_id).await?;

        Ok(LocalSnapshot {
            reports: reports.into_iter().map(ReportRow::to_local).collect(),
            documents: documents.into_iter().map(DocumentRow::to_local).collect(),
            incident_templates: templates.into_iter().map(TemplateRow::to_local).collect(),
            user_profile: profile.map(UserRow::to_profile),
        })
    }

    /// Like `try_load_from_remote`, but a failed read yields an empty snapshot.
    pub async fn load_from_remote(&self, user_id: UserId) -> LocalSnapshot {
        match self.try_load_from_remote(user_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(%user_id, "Error loading remote data: {}", e);
                LocalSnapshot::default()
            }
        }
    }

    /// Pulls the user's remote records onto this device. Local storage is only
    /// written once every table has been read.
    pub async fn hydrate_local(&self, user_id: UserId) -> Result<SnapshotSummary, HydrateError> {
        let snapshot = self.try_load_from_remote(user_id).await?;
        self.reader.write_snapshot(&snapshot)?;
        Ok(snapshot.summary())
    }
}

//=========================================================================================
// MigrationFlow (UI-facing state machine)
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Inactive,
    Checking,
    Ready,
    Migrating,
    Complete,
    Error,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationStatus::Inactive => "inactive",
            MigrationStatus::Checking => "checking",
            MigrationStatus::Ready => "ready",
            MigrationStatus::Migrating => "migrating",
            MigrationStatus::Complete => "complete",
            MigrationStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// A request the current state does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} while migration is {from}")]
pub struct TransitionError {
    pub from: MigrationStatus,
    pub action: &'static str,
}

/// Everything the UI needs to render the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub status: MigrationStatus,
    pub has_local_data: bool,
    pub summary: SnapshotSummary,
    pub error: Option<String>,
}

pub struct MigrationFlow {
    service: Arc<DataMigrationService>,
    state: MigrationState,
}

impl MigrationFlow {
    pub fn new(service: Arc<DataMigrationService>) -> Self {
        Self {
            service,
            state: MigrationState {
                status: MigrationStatus::Inactive,
                has_local_data: false,
                summary: SnapshotSummary::default(),
                error: None,
            },
        }
    }

    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    pub fn service(&self) -> Arc<DataMigrationService> {
        self.service.clone()
    }

    /// Looks for local data: `Ready` with a summary if there is any, otherwise
    /// straight to `Complete` with `has_local_data` unset.
    pub fn activate(&mut self) -> Result<&MigrationState, TransitionError> {
        if self.state.status == MigrationStatus::Migrating {
            return Err(self.reject("check for local data"));
        }
        self.state.status = MigrationStatus::Checking;
        self.state.error = None;

        let snapshot = self.service.reader().read_snapshot();
        self.state.has_local_data = !snapshot.is_empty();
        if self.state.has_local_data {
            self.state.summary = snapshot.summary();
            self.state.status = MigrationStatus::Ready;
        } else {
            self.state.summary = SnapshotSummary::default();
            self.state.status = MigrationStatus::Complete;
        }
        Ok(&self.state)
    }

    /// Enters `Migrating`. Allowed from `Ready`, and from `Error` as a retry.
    pub fn begin_migration(&mut self) -> Result<(), TransitionError> {
        match self.state.status {
            MigrationStatus::Ready | MigrationStatus::Error => {
                self.state.status = MigrationStatus::Migrating;
                self.state.error = None;
                Ok(())
            }
            _ => Err(self.reject("start migrating")),
        }
    }

    /// Applies the outcome of `DataMigrationService::migrate`. Local storage is
    /// cleared only here, and only on success.
    pub fn finish_migration(
        &mut self,
        outcome: Result<SnapshotSummary, RemoteError>,
    ) -> Result<&MigrationState, TransitionError> {
        if self.state.status != MigrationStatus::Migrating {
            return Err(self.reject("finish migrating"));
        }
        match outcome {
            Ok(_) => {
                self.service.reader().clear();
                self.state.status = MigrationStatus::Complete;
            }
            Err(e) => {
                self.state.status = MigrationStatus::Error;
                self.state.error = Some(e.to_string());
            }
        }
        Ok(&self.state)
    }

    /// `begin_migration`, `migrate`, `finish_migration` in one call.
    pub async fn run(&mut self, user_id: UserId) -> Result<&MigrationState, TransitionError> {
        self.begin_migration()?;
        let outcome = self.service.migrate(user_id).await;
        self.finish_migration(outcome)
    }

    /// Moves a `Migrating` flow whose run never reported back to `Error`.
    pub fn abandon(&mut self, reason: &str) -> Result<&MigrationState, TransitionError> {
        if self.state.status != MigrationStatus::Migrating {
            return Err(self.reject("abandon migration"));
        }
        warn!("Migration abandoned: {}", reason);
        self.state.status = MigrationStatus::Error;
        self.state.error = Some(reason.to_string());
        Ok(&self.state)
    }

    /// Abandons the local data. Allowed from `Ready` and `Error`.
    pub fn skip(&mut self) -> Result<&MigrationState, TransitionError> {
        match self.state.status {
            MigrationStatus::Ready | MigrationStatus::Error => {
                warn!("Migration skipped; discarding local data.");
                self.service.reader().clear();
                self.state.status = MigrationStatus::Complete;
                self.state.error = None;
                Ok(&self.state)
            }
            _ => Err(self.reject("skip migration")),
        }
    }

    fn reject(&self, action: &'static str) -> TransitionError {
        TransitionError {
            from: self.state.status,
            action,
        }
    }
}

/// Runs a migration on a shared flow without holding its lock across the writes.
///
/// The writes and `finish_migration` run on their own task, so the flow still
/// leaves `Migrating` when the caller's future is dropped halfway through.
pub async fn run_shared(
    flow: Arc<Mutex<MigrationFlow>>,
    user_id: UserId,
) -> Result<MigrationState, TransitionError> {
    let service = {
        let mut guard = flow.lock().await;
        guard.begin_migration()?;
        guard.service()
    };

    let task_flow = flow.clone();
    let task = tokio::spawn(async move {
        let outcome = service.migrate(user_id).await;
        let mut guard = task_flow.lock().await;
        let state = guard.finish_migration(outcome).cloned();
        state
    });

    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(%user_id, "Migration task failed: {}", e);
            let mut guard = flow.lock().await;
            let state = guard.abandon("migration interrupted").cloned();
            state
        }
    }
}
