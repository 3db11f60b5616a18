pub mod aggregation;
pub mod cached_reads;
pub mod data_access;
pub mod domain;
pub mod memory_store;
pub mod migration;
pub mod ports;
pub mod query;
pub mod query_cache;

pub use aggregation::CandidateStatistics;
pub use cached_reads::CachedReads;
pub use data_access::{CommentSubscription, DataAccess};
pub use domain::{
    Candidate, CandidateFilters, CandidatePatch, CandidateStatus, Comment, Identity, NewCandidate,
    NewComment, NewPolicy, Policy, PolicyPatch, User, UserRole,
};
pub use memory_store::InMemoryDocumentStore;
pub use ports::{
    DocumentStore, IdentityVerifier, PageScraper, PolicyAnalyzer, PortError, PortResult,
};
pub use query_cache::{QueryCache, QueryKey, QueryOptions, RetryPolicy};
