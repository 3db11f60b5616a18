//! services/api/src/adapters/scraper.rs
//!
//! Fetches a web page over HTTP and reduces it to readable text.
//! It implements the `PageScraper` port from the `core` crate.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::{header, Client, Url};
use std::time::Duration;
use tracing::info;
use voter_guide_core::domain::{ScrapeMetadata, ScrapedPage};
use voter_guide_core::ports::{PageScraper, PortError, PortResult};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; VoterGuideBot/1.0)";

/// Parses a scrape target. Only absolute http(s) URLs are accepted.
pub fn parse_target(raw: &str) -> PortResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| PortError::Validation(format!("invalid url '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(PortError::Validation(format!(
            "url must be an absolute http(s) address: '{}'",
            raw
        ))),
    }
}

struct MarkupPatterns {
    title: Regex,
    blocks: Regex,
    comments: Regex,
    tags: Regex,
    whitespace: Regex,
}

impl MarkupPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            title: Regex::new(r"(?is)<title[^>]*>(.*?)</title>")?,
            blocks: Regex::new(
                r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<noscript\b[^>]*>.*?</noscript>",
            )?,
            comments: Regex::new(r"(?s)<!--.*?-->")?,
            tags: Regex::new(r"<[^>]+>")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Returns `(title, text)` for an HTML document.
    fn extract(&self, html: &str) -> (String, String) {
        let title = self
            .title
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| self.collapse(&decode_entities(m.as_str())))
            .unwrap_or_default();

        let text = self.blocks.replace_all(html, " ");
        let text = self.comments.replace_all(&text, " ");
        let text = self.tags.replace_all(&text, " ");
        (title, self.collapse(&decode_entities(&text)))
    }

    fn collapse(&self, text: &str) -> String {
        self.whitespace.replace_all(text, " ").trim().to_string()
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub struct HttpPageScraper {
    client: Client,
    patterns: MarkupPatterns,
}

impl HttpPageScraper {
    pub fn new(timeout: Duration) -> Result<Self, PortError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let patterns =
            MarkupPatterns::compile().map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self { client, patterns })
    }
}

#[async_trait]
impl PageScraper for HttpPageScraper {
    async fn scrape(&self, url: &str) -> PortResult<ScrapedPage> {
        let target = parse_target(url)?;
        info!("Scraping {}", target);

        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("failed to fetch {}: {}", target, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortError::Unavailable(format!(
                "failed to fetch {}: HTTP {}",
                target, status
            )));
        }
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| PortError::Unavailable(format!("failed to read {}: {}", target, e)))?;

        let (title, content) = if content_type.contains("html") {
            self.patterns.extract(&body)
        } else {
            (String::new(), self.patterns.collapse(&body))
        };
        let word_count = content.split_whitespace().count();

        Ok(ScrapedPage {
            content,
            title,
            metadata: ScrapeMetadata {
                scraped_at: Utc::now(),
                word_count,
                content_type,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_strips_scripts_styles_and_tags() {
        let patterns = MarkupPatterns::compile().unwrap();
        let html = r#"<html><head><title> Policy &amp; Plan </title>
            <style>body { color: red; }</style>
            <script type="text/javascript">var x = "<p>hidden</p>";</script></head>
            <body><!-- nav --><h1>Childcare</h1><p>Free&nbsp;nursery   for all.</p></body></html>"#;

        let (title, text) = patterns.extract(html);

        assert_eq!(title, "Policy & Plan");
        assert_eq!(text, "Policy & Plan Childcare Free nursery for all.");
    }

    #[test]
    fn test_parse_target_rejects_non_http() {
        assert!(parse_target("https://example.org/a").is_ok());
        assert!(matches!(parse_target("ftp://example.org"), Err(PortError::Validation(_))));
        assert!(matches!(parse_target("not a url"), Err(PortError::Validation(_))));
        assert!(matches!(parse_target(""), Err(PortError::Validation(_))));
    }
}
