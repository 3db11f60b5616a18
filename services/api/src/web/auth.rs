//! services/api/src/web/auth.rs
//!
//! Sign-in sync. Credentials are handled by the auth provider; this endpoint
//! only mirrors the verified identity into the `users` collection.

use crate::error::port_error_response;
use crate::web::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use std::sync::Arc;
use tracing::info;
use voter_guide_core::domain::Identity;

/// POST /api/auth/session - Create or refresh the caller's user document
#[utoipa::path(
    post,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "The caller's user document"),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = []))
)]
pub async fn sign_in_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = state
        .reads
        .access()
        .sync_user_on_sign_in(&identity, &state.config.admin_emails)
        .await
        .map_err(|e| port_error_response("Failed to sync user", e))?;
    info!("User {} signed in as {:?}", user.id, user.role);
    Ok(Json(user))
}
