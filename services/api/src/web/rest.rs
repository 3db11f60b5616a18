//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the candidate, policy, statistics and comment
//! endpoints, and the master definition for the OpenAPI specification.

use crate::error::port_error_response;
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{IntoParams, Modify, OpenApi, ToSchema};
use voter_guide_core::domain::{
    CandidateFilters, CandidatePatch, CandidateStatus, Identity, NewCandidate, NewComment,
    NewPolicy, PolicyPatch,
};
use voter_guide_core::ports::PortResult;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_candidates_handler,
        get_candidate_handler,
        create_candidate_handler,
        update_candidate_handler,
        delete_candidate_handler,
        add_policy_handler,
        update_policy_handler,
        statistics_handler,
        list_comments_handler,
        add_comment_handler,
        like_comment_handler,
        unlike_comment_handler,
        crate::web::auth::sign_in_handler,
        crate::web::proxy::scrape_url_handler,
        crate::web::proxy::analyze_policies_handler,
        crate::web::admin::migrate_handler,
        crate::web::admin::migration_status_handler,
    ),
    components(
        schemas(
            CreatedResponse,
            LikeResponse,
            CommentRequest,
            crate::web::proxy::ScrapeRequest,
            crate::web::proxy::AnalyzeRequest,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Voter Guide API", description = "Candidates, evaluated policies, comments and admin tooling.")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by the protected paths.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The response payload sent after a document is created.
#[derive(Serialize, ToSchema)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Serialize, ToSchema)]
pub struct LikeResponse {
    /// `false` when the like state already matched the request.
    pub changed: bool,
}

/// A new comment. The author is always the signed-in caller.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub candidate_id: String,
    #[serde(default)]
    pub policy_id: Option<String>,
    pub text: String,
}

/// Candidate list filters. `party` and `status` take comma separated values.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CandidateQuery {
    pub prefecture: Option<String>,
    pub election_type: Option<String>,
    pub party: Option<String>,
    pub status: Option<String>,
}

impl CandidateQuery {
    pub fn into_filters(self) -> PortResult<CandidateFilters> {
        let status = match self.status {
            Some(raw) => Some(
                split_list(&raw)
                    .iter()
                    .map(|s| s.parse::<CandidateStatus>())
                    .collect::<PortResult<Vec<_>>>()?,
            ),
            None => None,
        };
        Ok(CandidateFilters {
            prefecture: self.prefecture.filter(|p| !p.is_empty()),
            election_type: self.election_type.filter(|e| !e.is_empty()),
            party: self.party.map(|raw| split_list(&raw)),
            status,
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CommentQuery {
    pub policy_id: Option<String>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

//=========================================================================================
// Candidate Handlers
//=========================================================================================

/// List candidates, newest update first, each with its policies.
#[utoipa::path(
    get,
    path = "/api/candidates",
    params(CandidateQuery),
    responses(
        (status = 200, description = "Matching candidates"),
        (status = 400, description = "Unknown status filter")
    )
)]
pub async fn list_candidates_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<CandidateQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let filters = query
        .into_filters()
        .map_err(|e| port_error_response("Invalid candidate filters", e))?;
    let candidates = app_state
        .reads
        .list_candidates(&filters)
        .await
        .map_err(|e| port_error_response("Failed to list candidates", e))?;
    Ok(Json(candidates))
}

#[utoipa::path(
    get,
    path = "/api/candidates/{id}",
    params(("id" = String, Path, description = "Candidate id")),
    responses(
        (status = 200, description = "The candidate with its policies"),
        (status = 404, description = "No such candidate")
    )
)]
pub async fn get_candidate_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match app_state.reads.get_candidate(&id).await {
        Ok(Some(candidate)) => Ok(Json(candidate)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("Candidate {} not found", id))),
        Err(e) => Err(port_error_response("Failed to load candidate", e)),
    }
}

#[utoipa::path(
    post,
    path = "/api/candidates",
    request_body(content_type = "application/json", description = "The new candidate, without policies."),
    responses(
        (status = 201, description = "Candidate created", body = CreatedResponse),
        (status = 400, description = "Invalid candidate"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Not an administrator")
    ),
    security(("bearer" = []))
)]
pub async fn create_candidate_handler(
    State(app_state): State<Arc<AppState>>,
    Json(candidate): Json<NewCandidate>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let id = app_state
        .reads
        .create_candidate(&candidate)
        .await
        .map_err(|e| port_error_response("Failed to create candidate", e))?;
    info!("Created candidate {}", id);
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[utoipa::path(
    patch,
    path = "/api/candidates/{id}",
    params(("id" = String, Path, description = "Candidate id")),
    request_body(content_type = "application/json", description = "The fields to change."),
    responses(
        (status = 204, description = "Candidate updated"),
        (status = 404, description = "No such candidate")
    ),
    security(("bearer" = []))
)]
pub async fn update_candidate_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<CandidatePatch>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .reads
        .update_candidate(&id, &patch)
        .await
        .map_err(|e| port_error_response("Failed to update candidate", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a candidate together with its policies.
#[utoipa::path(
    delete,
    path = "/api/candidates/{id}",
    params(("id" = String, Path, description = "Candidate id")),
    responses(
        (status = 204, description = "Candidate and policies deleted"),
        (status = 404, description = "No such candidate")
    ),
    security(("bearer" = []))
)]
pub async fn delete_candidate_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .reads
        .delete_candidate(&id)
        .await
        .map_err(|e| port_error_response("Failed to delete candidate", e))?;
    info!("Deleted candidate {}", id);
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Policy Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/api/candidates/{id}/policies",
    params(("id" = String, Path, description = "Candidate id")),
    request_body(content_type = "application/json", description = "The evaluated policy."),
    responses(
        (status = 201, description = "Policy added", body = CreatedResponse),
        (status = 400, description = "Invalid policy"),
        (status = 404, description = "No such candidate")
    ),
    security(("bearer" = []))
)]
pub async fn add_policy_handler(
    State(app_state): State<Arc<AppState>>,
    Path(candidate_id): Path<String>,
    Json(policy): Json<NewPolicy>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let id = app_state
        .reads
        .add_policy(&candidate_id, &policy)
        .await
        .map_err(|e| port_error_response("Failed to add policy", e))?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[utoipa::path(
    patch,
    path = "/api/candidates/{id}/policies/{policy_id}",
    params(
        ("id" = String, Path, description = "Candidate id"),
        ("policy_id" = String, Path, description = "Policy id")
    ),
    request_body(content_type = "application/json", description = "The fields to change."),
    responses(
        (status = 204, description = "Policy updated"),
        (status = 404, description = "No such policy")
    ),
    security(("bearer" = []))
)]
pub async fn update_policy_handler(
    State(app_state): State<Arc<AppState>>,
    Path((candidate_id, policy_id)): Path<(String, String)>,
    Json(patch): Json<PolicyPatch>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .reads
        .update_policy(&candidate_id, &policy_id, &patch)
        .await
        .map_err(|e| port_error_response("Failed to update policy", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Aggregate figures over the filtered candidate set.
#[utoipa::path(
    get,
    path = "/api/statistics",
    params(CandidateQuery),
    responses((status = 200, description = "Counts, average feasibility and top policies"))
)]
pub async fn statistics_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<CandidateQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let filters = query
        .into_filters()
        .map_err(|e| port_error_response("Invalid candidate filters", e))?;
    let statistics = app_state
        .reads
        .statistics(&filters)
        .await
        .map_err(|e| port_error_response("Failed to compute statistics", e))?;
    Ok(Json(statistics))
}

//=========================================================================================
// Comment Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/candidates/{id}/comments",
    params(("id" = String, Path, description = "Candidate id"), CommentQuery),
    responses((status = 200, description = "Active comments, newest first, at most 50"))
)]
pub async fn list_comments_handler(
    State(app_state): State<Arc<AppState>>,
    Path(candidate_id): Path<String>,
    Query(query): Query<CommentQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let comments = app_state
        .reads
        .access()
        .list_comments(&candidate_id, query.policy_id.as_deref())
        .await
        .map_err(|e| port_error_response("Failed to list comments", e))?;
    Ok(Json(comments))
}

#[utoipa::path(
    post,
    path = "/api/comments",
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment posted", body = CreatedResponse),
        (status = 400, description = "Empty text or missing candidate"),
        (status = 401, description = "Not signed in")
    ),
    security(("bearer" = []))
)]
pub async fn add_comment_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CommentRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_name = identity
        .name
        .clone()
        .or_else(|| {
            identity
                .email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .map(str::to_string)
        })
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Anonymous".to_string());
    let comment = NewComment {
        candidate_id: request.candidate_id,
        policy_id: request.policy_id.filter(|p| !p.is_empty()),
        user_id: identity.uid,
        user_name,
        text: request.text,
    };
    let id = app_state
        .reads
        .access()
        .add_comment(&comment)
        .await
        .map_err(|e| port_error_response("Failed to add comment", e))?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[utoipa::path(
    post,
    path = "/api/comments/{id}/like",
    params(("id" = String, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Like recorded", body = LikeResponse),
        (status = 404, description = "No such comment")
    ),
    security(("bearer" = []))
)]
pub async fn like_comment_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let changed = app_state
        .reads
        .access()
        .like_comment(&comment_id, &identity.uid)
        .await
        .map_err(|e| port_error_response("Failed to like comment", e))?;
    Ok(Json(LikeResponse { changed }))
}

#[utoipa::path(
    delete,
    path = "/api/comments/{id}/like",
    params(("id" = String, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Like removed", body = LikeResponse),
        (status = 404, description = "No such comment")
    ),
    security(("bearer" = []))
)]
pub async fn unlike_comment_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let changed = app_state
        .reads
        .access()
        .unlike_comment(&comment_id, &identity.uid)
        .await
        .map_err(|e| port_error_response("Failed to unlike comment", e))?;
    Ok(Json(LikeResponse { changed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_query_splits_lists() {
        let query = CandidateQuery {
            prefecture: Some("Tokyo".to_string()),
            election_type: Some(String::new()),
            party: Some("A, B,,".to_string()),
            status: Some("incumbent,newcomer".to_string()),
        };
        let filters = query.into_filters().unwrap();

        assert_eq!(filters.prefecture.as_deref(), Some("Tokyo"));
        assert_eq!(filters.election_type, None);
        assert_eq!(filters.party, Some(vec!["A".to_string(), "B".to_string()]));
        assert_eq!(
            filters.status,
            Some(vec![CandidateStatus::Incumbent, CandidateStatus::Newcomer])
        );
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let query = CandidateQuery {
            status: Some("retired".to_string()),
            ..Default::default()
        };
        assert!(query.into_filters().is_err());
    }
}
