//! crates/voter_guide_core/src/query_cache.rs
//!
//! A keyed read cache with staleness windows, stale-while-revalidate refreshes,
//! retry with exponential backoff and prefix invalidation.
//!
//! The entry map is owned by one `QueryCache` and guarded by a mutex that is never
//! held across an await, so handles can be shared freely between tasks.

use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::ports::{PortError, PortResult};

pub const DEFAULT_MAX_ENTRIES: usize = 512;

//=========================================================================================
// Keys, Options and Retry Policy
//=========================================================================================

/// Operation name followed by its JSON-encoded arguments, e.g. `["candidate","\"abc\""]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    parts: Vec<String>,
}

impl QueryKey {
    pub fn new(operation: &str) -> Self {
        Self {
            parts: vec![operation.to_string()],
        }
    }

    pub fn arg<T: Serialize>(mut self, arg: &T) -> Self {
        let encoded = serde_json::to_string(arg).unwrap_or_else(|e| format!("<{}>", e));
        self.parts.push(encoded);
        self
    }

    /// True if `prefix` names this key or one of its ancestors.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.parts.starts_with(&prefix.parts)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Not-found and forbidden failures are final.
    pub fn should_retry(&self, error: &PortError, attempt: u32) -> bool {
        attempt < self.max_retries && !matches!(error.status_code(), 404 | 403)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub stale_time: Duration,
    pub retry: RetryPolicy,
}

impl QueryOptions {
    /// Candidate reads stay fresh for five minutes.
    pub fn candidates() -> Self {
        Self {
            stale_time: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
        }
    }

    /// Statistics stay fresh for ten minutes.
    pub fn statistics() -> Self {
        Self {
            stale_time: Duration::from_secs(10 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

//=========================================================================================
// The Cache
//=========================================================================================

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    fetched_at: Instant,
    /// Id of the background refresh currently allowed to replace this entry.
    refresh: Option<u64>,
}

struct CacheInner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    max_entries: usize,
    refreshes: TaskTracker,
    /// Serializes `wait_for_refreshes` callers around the tracker's close/reopen.
    refresh_waiters: tokio::sync::Mutex<()>,
    next_refresh_id: AtomicU64,
    /// Bumped under the entry lock by every invalidation. An inline fetch only
    /// stores its result if no invalidation happened while it ran.
    epoch: AtomicU64,
}

enum Lookup<T> {
    Fresh(T),
    Stale { value: T, refresh_id: Option<u64> },
    Missing,
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                max_entries: max_entries.max(1),
                refreshes: TaskTracker::new(),
                refresh_waiters: tokio::sync::Mutex::new(()),
                next_refresh_id: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Serves `key` from the cache when fresh. A stale value is returned at once
    /// while one background refresh runs; a missing value is fetched inline,
    /// retrying per `options.retry`.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, options: &QueryOptions, fetcher: F) -> PortResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PortResult<T>> + Send + 'static,
    {
        match self.lookup::<T>(&key, options.stale_time) {
            Lookup::Fresh(value) => {
                debug!("cache hit {}", key);
                Ok(value)
            }
            Lookup::Stale { value, refresh_id } => {
                if let Some(refresh_id) = refresh_id {
                    debug!("cache stale {}, refreshing in background", key);
                    let cache = self.clone();
                    let retry = options.retry.clone();
                    self.inner.refreshes.spawn(async move {
                        match run_with_retry(&key, &fetcher, &retry).await {
                            Ok(fresh) => cache.complete_refresh(&key, refresh_id, fresh),
                            Err(e) => {
                                warn!("background refresh of {} failed: {}", key, e);
                                cache.abandon_refresh(&key, refresh_id);
                            }
                        }
                    });
                }
                Ok(value)
            }
            Lookup::Missing => {
                debug!("cache miss {}", key);
                let epoch = self.inner.epoch.load(Ordering::SeqCst);
                let value = run_with_retry(&key, &fetcher, &options.retry).await?;
                let mut entries = self.lock();
                if self.inner.epoch.load(Ordering::SeqCst) == epoch {
                    self.insert_locked(&mut entries, key, value.clone());
                } else {
                    debug!("not caching {}, invalidated while fetching", key);
                }
                Ok(value)
            }
        }
    }

    /// Drops the entry for exactly `key`.
    pub fn invalidate(&self, key: &QueryKey) {
        let mut entries = self.lock();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if entries.remove(key).is_some() {
            debug!("invalidated {}", key);
        }
    }

    /// Drops every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &QueryKey) {
        let mut entries = self.lock();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        debug!("invalidated {} entries under {}", before - entries.len(), prefix);
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until every background refresh started so far has finished.
    /// Concurrent callers take turns so one caller's reopen never strands another's wait.
    pub async fn wait_for_refreshes(&self) {
        let _turn = self.inner.refresh_waiters.lock().await;
        self.inner.refreshes.close();
        self.inner.refreshes.wait().await;
        self.inner.refreshes.reopen();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        // Entries stay consistent even if a holder panicked; keep serving them.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup<T: Clone + 'static>(&self, key: &QueryKey, stale_time: Duration) -> Lookup<T> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return Lookup::Missing;
        };
        let Some(value) = entry.value.downcast_ref::<T>().cloned() else {
            warn!("cache entry {} holds a different type, refetching", key);
            return Lookup::Missing;
        };
        if entry.fetched_at.elapsed() < stale_time {
            return Lookup::Fresh(value);
        }
        let refresh_id = if entry.refresh.is_none() {
            let id = self.inner.next_refresh_id.fetch_add(1, Ordering::Relaxed);
            entry.refresh = Some(id);
            Some(id)
        } else {
            None
        };
        Lookup::Stale { value, refresh_id }
    }

    fn insert_locked<T: Send + Sync + 'static>(
        &self,
        entries: &mut HashMap<QueryKey, Entry>,
        key: QueryKey,
        value: T,
    ) {
        entries.insert(
            key.clone(),
            Entry {
                value: Arc::new(value),
                fetched_at: Instant::now(),
                refresh: None,
            },
        );
        while entries.len() > self.inner.max_entries {
            let oldest = entries
                .iter()
                .filter(|(k, _)| **k != key)
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(oldest) => {
                    debug!("evicting {}", oldest);
                    entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Stores a refreshed value unless the entry was invalidated meanwhile.
    fn complete_refresh<T: Send + Sync + 'static>(&self, key: &QueryKey, refresh_id: u64, value: T) {
        let mut entries = self.lock();
        let still_wanted = entries
            .get(key)
            .map(|e| e.refresh == Some(refresh_id))
            .unwrap_or(false);
        if still_wanted {
            self.insert_locked(&mut entries, key.clone(), value);
        } else {
            debug!("discarding refresh of invalidated {}", key);
        }
    }

    fn abandon_refresh(&self, key: &QueryKey, refresh_id: u64) {
        if let Some(entry) = self.lock().get_mut(key) {
            if entry.refresh == Some(refresh_id) {
                entry.refresh = None;
            }
        }
    }
}

async fn run_with_retry<T, F, Fut>(key: &QueryKey, fetcher: &F, retry: &RetryPolicy) -> PortResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = PortResult<T>>,
{
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Ok(value) => return Ok(value),
            Err(e) if retry.should_retry(&e, attempt) => {
                let delay = retry.delay_for(attempt);
                warn!("query {} failed (attempt {}), retrying in {:?}: {}", key, attempt + 1, delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
