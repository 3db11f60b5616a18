//! services/api/src/web/admin.rs
//!
//! Admin-only callable operations. The admin check itself lives in the core
//! migration functions so any caller gets the same permission-denied result.

use crate::error::port_error_response;
use crate::web::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use std::sync::Arc;
use voter_guide_core::domain::Identity;

/// Move embedded policy arrays into the policies sub-collection.
#[utoipa::path(
    post,
    path = "/api/admin/migrate",
    responses(
        (status = 200, description = "`{candidatesMigrated, policiesMigrated}`"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Caller is not an administrator")
    ),
    security(("bearer" = []))
)]
pub async fn migrate_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let access = app_state.reads.access();
    let report = access
        .migrate_embedded_policies(&identity, &app_state.config.admin_emails)
        .await
        .map_err(|e| port_error_response("Migration failed", e))?;
    if report.candidates_migrated > 0 {
        app_state.reads.invalidate_all();
    }
    Ok(Json(report))
}

#[utoipa::path(
    get,
    path = "/api/admin/migration-status",
    responses(
        (status = 200, description = "`{totalCandidates, pendingCandidates, subcollectionPolicies, complete}`"),
        (status = 403, description = "Caller is not an administrator")
    ),
    security(("bearer" = []))
)]
pub async fn migration_status_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let status = app_state
        .reads
        .access()
        .migration_status(&identity, &app_state.config.admin_emails)
        .await
        .map_err(|e| port_error_response("Failed to read migration status", e))?;
    Ok(Json(status))
}
