//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use voter_guide_core::ports::{IdentityVerifier, PageScraper, PolicyAnalyzer};
use voter_guide_core::CachedReads;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Cached reads plus cache-invalidating mutations over the document store.
    pub reads: CachedReads,
    pub config: Arc<Config>,
    pub scraper: Arc<dyn PageScraper>,
    pub analyzer: Arc<dyn PolicyAnalyzer>,
    pub verifier: Arc<dyn IdentityVerifier>,
}
