pub mod admin;
pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod proxy;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

pub use middleware::{require_admin, require_auth};
pub use state::AppState;
pub use ws_handler::ws_handler;

/// Builds the API router: public reads, signed-in comment and admin-callable
/// routes, and administrator-only writes and proxies.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/api/candidates", get(rest::list_candidates_handler))
        .route("/api/candidates/{id}", get(rest::get_candidate_handler))
        .route("/api/candidates/{id}/comments", get(rest::list_comments_handler))
        .route("/api/candidates/{id}/comments/ws", get(ws_handler))
        .route("/api/statistics", get(rest::statistics_handler));

    // Signed-in routes. The migration handlers check the admin claim themselves.
    let signed_in_routes = Router::new()
        .route("/api/auth/session", post(auth::sign_in_handler))
        .route("/api/comments", post(rest::add_comment_handler))
        .route(
            "/api/comments/{id}/like",
            post(rest::like_comment_handler).delete(rest::unlike_comment_handler),
        )
        .route("/api/admin/migrate", post(admin::migrate_handler))
        .route("/api/admin/migration-status", get(admin::migration_status_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Administrator routes. `require_auth` is the outer layer so it runs first.
    let admin_routes = Router::new()
        .route("/api/candidates", post(rest::create_candidate_handler))
        .route(
            "/api/candidates/{id}",
            patch(rest::update_candidate_handler).delete(rest::delete_candidate_handler),
        )
        .route("/api/candidates/{id}/policies", post(rest::add_policy_handler))
        .route(
            "/api/candidates/{id}/policies/{policy_id}",
            patch(rest::update_policy_handler),
        )
        .route("/api/scrape-url", post(proxy::scrape_url_handler))
        .route("/api/analyze-policies", post(proxy::analyze_policies_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_admin,
        ))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(signed_in_routes)
        .merge(admin_routes)
        .with_state(app_state)
}
