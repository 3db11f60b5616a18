//! crates/voter_guide_core/src/cached_reads.rs
//!
//! The data access layer seen through the query cache. Reads are cached and
//! retried; writes go straight to the data access layer, fail fast, and on
//! success invalidate every cache entry that could now be out of date.

use std::sync::Arc;

use crate::aggregation::CandidateStatistics;
use crate::data_access::DataAccess;
use crate::domain::{Candidate, CandidateFilters, CandidatePatch, NewCandidate, NewPolicy, PolicyPatch};
use crate::ports::{PortError, PortResult};
use crate::query_cache::{QueryCache, QueryKey, QueryOptions};

/// Number of entries in the statistics top-policy list.
pub const TOP_POLICY_COUNT: usize = 10;

pub fn candidates_key(filters: &CandidateFilters) -> QueryKey {
    QueryKey::new("candidates").arg(filters)
}

pub fn candidate_key(id: &str) -> QueryKey {
    QueryKey::new("candidate").arg(&id)
}

pub fn statistics_key(filters: &CandidateFilters) -> QueryKey {
    QueryKey::new("statistics").arg(filters)
}

#[derive(Clone)]
pub struct CachedReads {
    access: DataAccess,
    cache: QueryCache,
}

impl CachedReads {
    pub fn new(access: DataAccess, cache: QueryCache) -> Self {
        Self { access, cache }
    }

    /// The uncached layer, for comment and user operations.
    pub fn access(&self) -> &DataAccess {
        &self.access
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    // --- Reads ---

    pub async fn list_candidates(&self, filters: &CandidateFilters) -> PortResult<Arc<Vec<Candidate>>> {
        let access = self.access.clone();
        let owned = filters.clone();
        self.cache
            .fetch(candidates_key(filters), &QueryOptions::candidates(), move || {
                let access = access.clone();
                let filters = owned.clone();
                async move { access.list_candidates(&filters).await.map(Arc::new) }
            })
            .await
    }

    pub async fn get_candidate(&self, id: &str) -> PortResult<Option<Arc<Candidate>>> {
        let access = self.access.clone();
        let owned = id.to_string();
        self.cache
            .fetch(candidate_key(id), &QueryOptions::candidates(), move || {
                let access = access.clone();
                let id = owned.clone();
                async move { Ok::<_, PortError>(access.get_candidate(&id).await?.map(Arc::new)) }
            })
            .await
    }

    pub async fn statistics(&self, filters: &CandidateFilters) -> PortResult<Arc<CandidateStatistics>> {
        let access = self.access.clone();
        let owned = filters.clone();
        self.cache
            .fetch(statistics_key(filters), &QueryOptions::statistics(), move || {
                let access = access.clone();
                let filters = owned.clone();
                async move {
                    let candidates = access.list_candidates(&filters).await?;
                    Ok::<_, PortError>(Arc::new(CandidateStatistics::compute(
                        &candidates,
                        TOP_POLICY_COUNT,
                    )))
                }
            })
            .await
    }

    // --- Mutations ---

    pub async fn create_candidate(&self, data: &NewCandidate) -> PortResult<String> {
        let id = self.access.create_candidate(data).await?;
        self.invalidate_collections();
        Ok(id)
    }

    pub async fn update_candidate(&self, id: &str, patch: &CandidatePatch) -> PortResult<()> {
        self.access.update_candidate(id, patch).await?;
        self.invalidate_candidate(id);
        Ok(())
    }

    pub async fn delete_candidate(&self, id: &str) -> PortResult<()> {
        self.access.delete_candidate(id).await?;
        self.invalidate_candidate(id);
        Ok(())
    }

    pub async fn add_policy(&self, candidate_id: &str, data: &NewPolicy) -> PortResult<String> {
        let id = self.access.add_policy(candidate_id, data).await?;
        self.invalidate_candidate(candidate_id);
        Ok(id)
    }

    pub async fn update_policy(
        &self,
        candidate_id: &str,
        policy_id: &str,
        patch: &PolicyPatch,
    ) -> PortResult<()> {
        self.access.update_policy(candidate_id, policy_id, patch).await?;
        self.invalidate_candidate(candidate_id);
        Ok(())
    }

    /// Invalidates one candidate plus every collection-level query.
    pub fn invalidate_candidate(&self, id: &str) {
        self.cache.invalidate(&candidate_key(id));
        self.invalidate_collections();
    }

    /// Drops every cached candidate read. Used after bulk rewrites such as migrations.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_prefix(&QueryKey::new("candidate"));
        self.invalidate_collections();
    }

    pub fn invalidate_collections(&self) {
        self.cache.invalidate_prefix(&QueryKey::new("candidates"));
        self.cache.invalidate_prefix(&QueryKey::new("statistics"));
    }
}
