//! services/api/src/web/migration.rs
//!
//! Endpoints driving the local-to-cloud migration flow and reading records back
//! from the remote store.

use axum::{extract::State, http::StatusCode, Extension, Json};
use custodyx_core::domain::{AuthUser, IncidentTemplate, LocalSnapshot, Report, SnapshotSummary, StoredDocument, UserProfile};
use custodyx_core::migration::{run_shared, HydrateError, MigrationState, TransitionError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::web::state::AppState;

//=========================================================================================
// Response Types
//=========================================================================================

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryView {
    pub reports: usize,
    pub documents: usize,
    pub templates: usize,
    pub has_profile: bool,
}

impl From<SnapshotSummary> for SummaryView {
    fn from(summary: SnapshotSummary) -> Self {
        Self {
            reports: summary.reports,
            documents: summary.documents,
            templates: summary.templates,
            has_profile: summary.has_profile,
        }
    }
}

/// Where the migration flow stands.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStateView {
    /// One of `inactive`, `checking`, `ready`, `migrating`, `complete`, `error`.
    pub status: String,
    pub has_local_data: bool,
    pub summary: SummaryView,
    pub error: Option<String>,
}

impl From<&MigrationState> for MigrationStateView {
    fn from(state: &MigrationState) -> Self {
        Self {
            status: state.status.to_string(),
            has_local_data: state.has_local_data,
            summary: state.summary.into(),
            error: state.error.clone(),
        }
    }
}

/// Records in their device shape.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordsResponse {
    #[schema(value_type = Vec<Object>)]
    pub reports: Vec<Report>,
    #[schema(value_type = Vec<Object>)]
    pub documents: Vec<StoredDocument>,
    #[schema(value_type = Vec<Object>)]
    pub incident_templates: Vec<IncidentTemplate>,
    #[schema(value_type = Option<Object>)]
    pub user_profile: Option<UserProfile>,
}

impl From<LocalSnapshot> for RecordsResponse {
    fn from(snapshot: LocalSnapshot) -> Self {
        Self {
            reports: snapshot.reports,
            documents: snapshot.documents,
            incident_templates: snapshot.incident_templates,
            user_profile: snapshot.user_profile,
        }
    }
}

fn transition_rejected(e: TransitionError) -> (StatusCode, String) {
    (StatusCode::CONFLICT, e.to_string())
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /migration - Check this device for local data
#[utoipa::path(
    get,
    path = "/migration",
    responses(
        (status = 200, description = "Flow is ready, or complete when there is nothing to migrate", body = MigrationStateView),
        (status = 401, description = "Not signed in"),
        (status = 409, description = "A migration is running")
    )
)]
pub async fn migration_status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MigrationStateView>, (StatusCode, String)> {
    let mut flow = state.migration.lock().await;
    let view: MigrationStateView = flow.activate().map_err(transition_rejected)?.into();
    Ok(Json(view))
}

/// POST /migration/start - Copy local records to the cloud, then clear them
#[utoipa::path(
    post,
    path = "/migration/start",
    responses(
        (status = 200, description = "Migration finished; status is complete or error", body = MigrationStateView),
        (status = 401, description = "Not signed in"),
        (status = 409, description = "Flow is not ready to migrate")
    )
)]
pub async fn start_migration_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MigrationStateView>, (StatusCode, String)> {
    info!(user_id = %user.id, "Starting migration.");
    let finished = run_shared(state.migration.clone(), user.id)
        .await
        .map_err(transition_rejected)?;
    Ok(Json(MigrationStateView::from(&finished)))
}

/// POST /migration/skip - Discard local records and start fresh
#[utoipa::path(
    post,
    path = "/migration/skip",
    responses(
        (status = 200, description = "Local data discarded", body = MigrationStateView),
        (status = 401, description = "Not signed in"),
        (status = 409, description = "Nothing to skip")
    )
)]
pub async fn skip_migration_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MigrationStateView>, (StatusCode, String)> {
    let mut flow = state.migration.lock().await;
    let view: MigrationStateView = flow.skip().map_err(transition_rejected)?.into();
    Ok(Json(view))
}

/// GET /records - The signed-in user's records from the cloud, newest first
#[utoipa::path(
    get,
    path = "/records",
    responses(
        (status = 200, description = "Records; empty when the store could not be read", body = RecordsResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn records_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<RecordsResponse> {
    let service = state.migration.lock().await.service();
    Json(service.load_from_remote(user.id).await.into())
}

/// POST /records/hydrate - Copy the user's cloud records onto this device
#[utoipa::path(
    post,
    path = "/records/hydrate",
    responses(
        (status = 200, description = "Records written to local storage", body = SummaryView),
        (status = 401, description = "Not signed in"),
        (status = 500, description = "Local storage could not be written"),
        (status = 502, description = "Cloud records could not be read; local storage untouched")
    )
)]
pub async fn hydrate_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SummaryView>, (StatusCode, String)> {
    let service = state.migration.lock().await.service();
    let summary = service.hydrate_local(user.id).await.map_err(|e| {
        error!(user_id = %user.id, "Failed to hydrate local storage: {}", e);
        match e {
            HydrateError::Remote(_) => (StatusCode::BAD_GATEWAY, e.to_string()),
            HydrateError::Local(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to write local storage".to_string(),
            ),
        }
    })?;
    Ok(Json(summary.into()))
}
