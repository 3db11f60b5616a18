//! services/api/src/web/proxy.rs
//!
//! Thin proxy endpoints used by the admin import flow: page scraping and
//! forwarding scraped text to an external policy analyzer.

use crate::adapters::scraper::parse_target;
use crate::web::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use voter_guide_core::domain::AnalyzerKind;

#[derive(Deserialize, ToSchema)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// One of `gemini`, `claude` or `perplexity`.
    #[serde(default)]
    pub analyzer: Option<String>,
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "success": false, "error": message.into() }))).into_response()
}

/// Unreadable bodies get the same `{success: false}` envelope as any other bad request.
fn read_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| failure(StatusCode::BAD_REQUEST, rejection.body_text()))
}

/// Fetch a page and return its readable text.
#[utoipa::path(
    post,
    path = "/api/scrape-url",
    request_body = ScrapeRequest,
    responses(
        (status = 200, description = "`{success, content, title, metadata}`"),
        (status = 400, description = "Missing or malformed url"),
        (status = 500, description = "The page could not be fetched")
    ),
    security(("bearer" = []))
)]
pub async fn scrape_url_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Response {
    let request = match read_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Some(url) = request.url.filter(|u| !u.trim().is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, "url is required");
    };
    if let Err(e) = parse_target(&url) {
        return failure(StatusCode::BAD_REQUEST, e.to_string());
    }

    match app_state.scraper.scrape(&url).await {
        Ok(page) => {
            info!("Scraped {} ({} words)", url, page.metadata.word_count);
            Json(json!({
                "success": true,
                "content": page.content,
                "title": page.title,
                "metadata": page.metadata,
            }))
            .into_response()
        }
        Err(e) => {
            error!("Failed to scrape {}: {}", url, e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Forward scraped content to the selected analyzer and relay its reply.
#[utoipa::path(
    post,
    path = "/api/analyze-policies",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "The analyzer's response, unchanged"),
        (status = 400, description = "Missing content or unknown analyzer"),
        (status = 500, description = "The analyzer failed")
    ),
    security(("bearer" = []))
)]
pub async fn analyze_policies_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let request = match read_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Some(analyzer) = request
        .analyzer
        .as_deref()
        .and_then(AnalyzerKind::parse_external)
    else {
        return failure(
            StatusCode::BAD_REQUEST,
            "analyzer must be one of gemini, claude, perplexity",
        );
    };
    let Some(content) = request.content.filter(|c| !c.trim().is_empty()) else {
        return failure(StatusCode::BAD_REQUEST, "content is required");
    };
    let url = request.url.unwrap_or_default();

    match app_state.analyzer.analyze(&content, &url, analyzer).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            error!("{} analysis failed: {}", analyzer.as_str(), e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
