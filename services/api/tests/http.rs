//! End-to-end tests of the HTTP surface over the in-memory document store.

use api_lib::adapters::token::{Claims, JwtIdentityVerifier};
use api_lib::config::{Config, StoreBackend};
use api_lib::web::{build_router, state::AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tracing::Level;
use voter_guide_core::domain::{AnalyzerKind, ScrapeMetadata, ScrapedPage};
use voter_guide_core::ports::{PageScraper, PolicyAnalyzer, PortError, PortResult};
use voter_guide_core::{CachedReads, DataAccess, InMemoryDocumentStore, QueryCache};

const SECRET: &str = "integration-test-secret-0123456789abcdef";
const ALLOW_LISTED: &str = "chief@example.org";

//=========================================================================================
// Fakes and Helpers
//=========================================================================================

struct FakeScraper;

#[async_trait]
impl PageScraper for FakeScraper {
    async fn scrape(&self, url: &str) -> PortResult<ScrapedPage> {
        if url.contains("unreachable") {
            return Err(PortError::Unavailable(format!("failed to fetch {}: HTTP 502", url)));
        }
        Ok(ScrapedPage {
            content: "Free childcare for all families".to_string(),
            title: "Platform".to_string(),
            metadata: ScrapeMetadata {
                scraped_at: Utc::now(),
                word_count: 5,
                content_type: "text/html".to_string(),
            },
        })
    }
}

struct FakeAnalyzer;

#[async_trait]
impl PolicyAnalyzer for FakeAnalyzer {
    async fn analyze(&self, content: &str, url: &str, analyzer: AnalyzerKind) -> PortResult<Value> {
        if content == "explode" {
            return Err(PortError::Unavailable("analyzer returned HTTP 500".to_string()));
        }
        Ok(json!({ "analyzer": analyzer.as_str(), "url": url, "policies": [] }))
    }
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        store_backend: StoreBackend::Memory,
        database_url: None,
        log_level: Level::INFO,
        jwt_secret: SECRET.to_string(),
        admin_emails: vec![ALLOW_LISTED.to_string()],
        analyzer_function_url: None,
        scrape_timeout: Duration::from_secs(1),
        cache_max_entries: 64,
        cors_origin: "http://localhost:5173".to_string(),
    }
}

fn app() -> Router {
    let store = Arc::new(InMemoryDocumentStore::new());
    let state = Arc::new(AppState {
        reads: CachedReads::new(DataAccess::new(store), QueryCache::new(64)),
        config: Arc::new(test_config()),
        scraper: Arc::new(FakeScraper),
        analyzer: Arc::new(FakeAnalyzer),
        verifier: Arc::new(JwtIdentityVerifier::new(SECRET)),
    });
    build_router(state)
}

fn token(uid: &str, email: &str, admin: bool) -> String {
    let claims = Claims {
        sub: uid.to_string(),
        email: Some(email.to_string()),
        name: Some(format!("User {}", uid)),
        picture: None,
        admin,
        exp: (Utc::now().timestamp() + 3600) as u64,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn admin_token() -> String {
    token("admin-1", "ops@example.org", true)
}

fn user_token() -> String {
    token("user-1", "voter@example.org", false)
}

async fn send(app: &Router, method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()));
    (status, value)
}

async fn send_raw(app: &Router, uri: &str, auth: &str, raw: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", auth))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(raw.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn candidate_body(name: &str, status: &str) -> Value {
    json!({
        "name": name,
        "age": 45,
        "party": "Green",
        "status": status,
        "prefecture": "Tokyo",
        "electionType": "governor",
        "electionDate": "2026-07-07",
    })
}

fn policy_body(score: u8) -> Value {
    let detail = json!({ "score": score, "summary": "s", "report": "r", "references": [] });
    json!({
        "title": "Childcare",
        "category": "welfare",
        "description": "Free nursery places",
        "impact": "high",
        "feasibilityScore": score,
        "detailedEvaluation": {
            "technical": detail, "political": detail, "financial": detail, "timeline": detail
        },
        "analyzedBy": "manual",
    })
}

//=========================================================================================
// Candidates
//=========================================================================================

#[tokio::test]
async fn test_missing_candidate_is_404() {
    let app = app();
    let (status, _) = send(&app, Method::GET, "/api/candidates/nobody", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_candidate_writes_require_an_admin() {
    let app = app();
    let body = candidate_body("Aiko", "incumbent");

    let (status, _) = send(&app, Method::POST, "/api/candidates", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::POST, "/api/candidates", Some("garbage"), Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::POST, "/api/candidates", Some(&user_token()), Some(body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let allow_listed = token("chief", ALLOW_LISTED, false);
    let (status, _) = send(&app, Method::POST, "/api/candidates", Some(&allow_listed), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_create_then_read_candidate_with_policies() {
    let app = app();
    let admin = admin_token();

    let (status, created) = send(&app, Method::POST, "/api/candidates", Some(&admin), Some(candidate_body("Aiko", "incumbent"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, listed) = send(&app, Method::GET, "/api/candidates", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["policies"], json!([]));

    let uri = format!("/api/candidates/{}/policies", id);
    let (status, _) = send(&app, Method::POST, &uri, Some(&admin), Some(policy_body(80))).await;
    assert_eq!(status, StatusCode::CREATED);

    // The policy write invalidated the cached reads.
    let (status, candidate) = send(&app, Method::GET, &format!("/api/candidates/{}", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(candidate["policies"][0]["feasibilityScore"], json!(80));

    let (status, stats) = send(&app, Method::GET, "/api/statistics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalCandidates"], json!(1));
    assert_eq!(stats["averageFeasibility"], json!(80));
}

#[tokio::test]
async fn test_status_filter_and_bad_status() {
    let app = app();
    let admin = admin_token();
    send(&app, Method::POST, "/api/candidates", Some(&admin), Some(candidate_body("Aiko", "incumbent"))).await;
    send(&app, Method::POST, "/api/candidates", Some(&admin), Some(candidate_body("Ben", "newcomer"))).await;

    let (status, listed) = send(&app, Method::GET, "/api/candidates?status=newcomer", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = listed.as_array().unwrap().iter().map(|c| c["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Ben"]);

    let (status, _) = send(&app, Method::GET, "/api/candidates?status=retired", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_candidate_then_404() {
    let app = app();
    let admin = admin_token();
    let (_, created) = send(&app, Method::POST, "/api/candidates", Some(&admin), Some(candidate_body("Aiko", "former"))).await;
    let uri = format!("/api/candidates/{}", created["id"].as_str().unwrap());

    send(&app, Method::GET, &uri, None, None).await;
    let (status, _) = send(&app, Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

//=========================================================================================
// Proxies
//=========================================================================================

#[tokio::test]
async fn test_scrape_url_validation_and_failures() {
    let app = app();
    let admin = admin_token();

    let (status, body) = send(&app, Method::POST, "/api/scrape-url", Some(&admin), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    let (status, _) = send(&app, Method::POST, "/api/scrape-url", Some(&admin), Some(json!({ "url": "not a url" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::POST, "/api/scrape-url", Some(&admin), Some(json!({ "url": "https://unreachable.example/" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("502"));

    let (status, body) = send(&app, Method::POST, "/api/scrape-url", Some(&admin), Some(json!({ "url": "https://party.example/platform" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["title"], json!("Platform"));
    assert_eq!(body["metadata"]["wordCount"], json!(5));
}

#[tokio::test]
async fn test_proxies_reject_unreadable_bodies_with_failure_envelope() {
    let app = app();
    let admin = admin_token();

    for uri in ["/api/scrape-url", "/api/analyze-policies"] {
        let (status, body) = send_raw(&app, uri, &admin, "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].is_string());
    }

    let (status, body) = send(&app, Method::POST, "/api/scrape-url", Some(&admin), Some(json!({ "url": 5 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    let wrong_type = json!({ "content": ["a"], "analyzer": "claude" });
    let (status, body) = send(&app, Method::POST, "/api/analyze-policies", Some(&admin), Some(wrong_type)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_analyze_policies_checks_analyzer_and_proxies() {
    let app = app();
    let admin = admin_token();

    let bad = json!({ "content": "text", "url": "https://a.example", "analyzer": "manual" });
    let (status, _) = send(&app, Method::POST, "/api/analyze-policies", Some(&admin), Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let empty = json!({ "content": "", "analyzer": "claude" });
    let (status, _) = send(&app, Method::POST, "/api/analyze-policies", Some(&admin), Some(empty)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let ok = json!({ "content": "text", "url": "https://a.example", "analyzer": "gemini" });
    let (status, body) = send(&app, Method::POST, "/api/analyze-policies", Some(&admin), Some(ok)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analyzer"], json!("gemini"));

    let failing = json!({ "content": "explode", "analyzer": "perplexity" });
    let (status, body) = send(&app, Method::POST, "/api/analyze-policies", Some(&admin), Some(failing)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_proxies_are_admin_only() {
    let app = app();
    let body = json!({ "url": "https://party.example/platform" });
    let (status, _) = send(&app, Method::POST, "/api/scrape-url", Some(&user_token()), Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

//=========================================================================================
// Admin Callables and Sign-in
//=========================================================================================

#[tokio::test]
async fn test_migration_requires_admin_claim() {
    let app = app();

    let (status, _) = send(&app, Method::POST, "/api/admin/migrate", Some(&user_token()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, report) = send(&app, Method::POST, "/api/admin/migrate", Some(&admin_token()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["candidatesMigrated"], json!(0));

    let (status, migration) = send(&app, Method::GET, "/api/admin/migration-status", Some(&admin_token()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(migration["complete"], json!(true));
}

#[tokio::test]
async fn test_sign_in_bootstraps_allow_listed_admin() {
    let app = app();

    let (status, user) = send(&app, Method::POST, "/api/auth/session", Some(&user_token()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["role"], json!("user"));

    let chief = token("chief", ALLOW_LISTED, false);
    let (status, user) = send(&app, Method::POST, "/api/auth/session", Some(&chief), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["role"], json!("admin"));
}

//=========================================================================================
// Comments
//=========================================================================================

#[tokio::test]
async fn test_comment_post_list_and_likes() {
    let app = app();
    let user = user_token();

    let new_comment = json!({ "candidateId": "cand-1", "text": "Sounds good" });
    let (status, _) = send(&app, Method::POST, "/api/comments", None, Some(new_comment.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, created) = send(&app, Method::POST, "/api/comments", Some(&user), Some(new_comment)).await;
    assert_eq!(status, StatusCode::CREATED);
    let comment_id = created["id"].as_str().unwrap().to_string();

    let blank = json!({ "candidateId": "cand-1", "text": "   " });
    let (status, _) = send(&app, Method::POST, "/api/comments", Some(&user), Some(blank)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let like_uri = format!("/api/comments/{}/like", comment_id);
    let (_, first) = send(&app, Method::POST, &like_uri, Some(&user), None).await;
    let (_, second) = send(&app, Method::POST, &like_uri, Some(&user), None).await;
    assert_eq!(first["changed"], json!(true));
    assert_eq!(second["changed"], json!(false));

    let (status, comments) = send(&app, Method::GET, "/api/candidates/cand-1/comments", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(comments[0]["userId"], json!("user-1"));
    assert_eq!(comments[0]["likes"], json!(1));
    assert_eq!(comments[0]["likedBy"], json!(["user-1"]));

    let (_, unliked) = send(&app, Method::DELETE, &like_uri, Some(&user), None).await;
    assert_eq!(unliked["changed"], json!(true));
    let (_, comments) = send(&app, Method::GET, "/api/candidates/cand-1/comments", None, None).await;
    assert_eq!(comments[0]["likes"], json!(0));

    let (status, _) = send(&app, Method::POST, "/api/comments/missing/like", Some(&user), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
