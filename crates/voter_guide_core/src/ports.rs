//! crates/voter_guide_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the document database, the HTTP fetcher and the
//! external AI analyzers.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{Identity, ScrapedPage};
use crate::query::{CollectionPath, DocumentWrite, Fields, Query, StoredDocument};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Upstream service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// The HTTP-style status code this error carries.
    pub fn status_code(&self) -> u16 {
        match self {
            PortError::NotFound(_) => 404,
            PortError::Validation(_) => 400,
            PortError::PermissionDenied(_) => 403,
            PortError::Unauthorized => 401,
            PortError::Unavailable(_) => 503,
            PortError::Unexpected(_) => 500,
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A live sequence of full result sets for one query.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = PortResult<Vec<StoredDocument>>> + Send>>;

/// Runs against the current document inside a store transaction.
/// Returns `true` when it changed the document and the store must write it back.
pub type Mutator<'a> = Box<dyn FnOnce(&mut Fields) -> PortResult<bool> + Send + 'a>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &CollectionPath, id: &str) -> PortResult<Option<StoredDocument>>;

    async fn query(&self, query: &Query) -> PortResult<Vec<StoredDocument>>;

    /// Creates a document with a store-generated id and returns the id.
    async fn add(&self, collection: &CollectionPath, write: DocumentWrite) -> PortResult<String>;

    /// Creates or replaces the document with the given id.
    async fn set(&self, collection: &CollectionPath, id: &str, write: DocumentWrite) -> PortResult<()>;

    /// Merges fields into an existing document. Fails with `NotFound` if it is absent.
    async fn merge(&self, collection: &CollectionPath, id: &str, write: DocumentWrite) -> PortResult<()>;

    /// Read-modify-write as a single transaction. Fails with `NotFound` if the
    /// document is absent; returns whether the mutator changed it.
    async fn update_atomic(
        &self,
        collection: &CollectionPath,
        id: &str,
        mutator: Mutator<'_>,
    ) -> PortResult<bool>;

    /// Deletes a document and every document of the named sub-collections in one transaction.
    async fn delete_cascade(
        &self,
        collection: &CollectionPath,
        id: &str,
        sub_collections: &[&str],
    ) -> PortResult<()>;

    /// Opens a live query. The stream yields the current result set first and then
    /// the full result set again after every change; dropping it releases the subscription.
    async fn subscribe(&self, query: Query) -> PortResult<SnapshotStream>;
}

#[async_trait]
pub trait PageScraper: Send + Sync {
    /// Fetches a page and reduces it to readable text.
    async fn scrape(&self, url: &str) -> PortResult<ScrapedPage>;
}

#[async_trait]
pub trait PolicyAnalyzer: Send + Sync {
    /// Forwards scraped content to an external analyzer and returns its raw response.
    async fn analyze(
        &self,
        content: &str,
        url: &str,
        analyzer: crate::domain::AnalyzerKind,
    ) -> PortResult<serde_json::Value>;
}

pub trait IdentityVerifier: Send + Sync {
    /// Verifies a bearer token issued by the auth provider.
    fn verify(&self, token: &str) -> PortResult<Identity>;
}
