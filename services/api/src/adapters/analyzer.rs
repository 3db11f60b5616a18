//! services/api/src/adapters/analyzer.rs
//!
//! Forwards scraped page content to the external policy-analysis function.
//! The function owns the model calls; this adapter only relays its JSON reply.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use voter_guide_core::domain::AnalyzerKind;
use voter_guide_core::ports::{PolicyAnalyzer, PortError, PortResult};

/// Analysis calls run long model prompts downstream.
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    content: &'a str,
    url: &'a str,
    analyzer: &'a str,
}

pub struct HttpPolicyAnalyzer {
    client: Client,
    endpoint: Option<String>,
}

impl HttpPolicyAnalyzer {
    pub fn new(endpoint: Option<String>) -> Result<Self, PortError> {
        let client = Client::builder()
            .timeout(ANALYZE_TIMEOUT)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if endpoint.is_none() {
            warn!("ANALYZER_FUNCTION_URL is not set; policy analysis is disabled");
        }
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PolicyAnalyzer for HttpPolicyAnalyzer {
    async fn analyze(
        &self,
        content: &str,
        url: &str,
        analyzer: AnalyzerKind,
    ) -> PortResult<serde_json::Value> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| PortError::Unavailable("no analyzer function is configured".to_string()))?;
        info!("Forwarding {} chars from {} to the {} analyzer", content.len(), url, analyzer.as_str());

        let response = self
            .client
            .post(endpoint)
            .json(&AnalyzeRequest {
                content,
                url,
                analyzer: analyzer.as_str(),
            })
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("analyzer request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PortError::Unavailable(format!(
                "analyzer returned HTTP {}: {}",
                status, detail
            )));
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| PortError::Unexpected(format!("analyzer returned invalid JSON: {}", e)))
    }
}
