//! crates/voter_guide_core/src/memory_store.rs
//!
//! An in-process implementation of the `DocumentStore` port. All collections live
//! in one mutex-protected map, so every operation (including `update_atomic` and
//! `delete_cascade`) is a transaction. Changes are published on a broadcast
//! channel that drives live subscriptions.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::ports::{DocumentStore, Mutator, PortError, PortResult, SnapshotStream};
use crate::query::{format_timestamp, CollectionPath, DocumentWrite, Fields, Query, StoredDocument};

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct StoreState {
    collections: HashMap<CollectionPath, BTreeMap<String, Fields>>,
    last_stamp: Option<DateTime<Utc>>,
}

struct Inner {
    state: Mutex<StoreState>,
    changes: broadcast::Sender<CollectionPath>,
    reads: AtomicUsize,
}

/// A cloneable handle to a shared in-memory store.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                changes,
                reads: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of `get` and `query` calls served so far.
    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn lock(&self) -> PortResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| PortError::Unexpected("document store lock poisoned".to_string()))
    }

    fn run_query(&self, query: &Query) -> PortResult<Vec<StoredDocument>> {
        let state = self.lock()?;
        let matching = state
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| query.matches(fields))
                    .map(|(id, fields)| StoredDocument {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(query.arrange(matching))
    }

    fn notify(&self, collection: &CollectionPath) {
        // No receivers simply means nobody is subscribed.
        let _ = self.changes.send(collection.clone());
    }
}

impl StoreState {
    /// A server timestamp strictly later than every previous one.
    fn next_stamp(&mut self) -> String {
        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(now);
        format_timestamp(now)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &CollectionPath, id: &str) -> PortResult<Option<StoredDocument>> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.lock()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| StoredDocument {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<StoredDocument>> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.run_query(query)
    }

    async fn add(&self, collection: &CollectionPath, write: DocumentWrite) -> PortResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.set(collection, &id, write).await?;
        Ok(id)
    }

    async fn set(&self, collection: &CollectionPath, id: &str, write: DocumentWrite) -> PortResult<()> {
        {
            let mut state = self.inner.lock()?;
            let now = state.next_stamp();
            let mut fields = Fields::new();
            write.apply_to(&mut fields, &now);
            state
                .collections
                .entry(collection.clone())
                .or_default()
                .insert(id.to_string(), fields);
        }
        debug!("set {}/{}", collection, id);
        self.inner.notify(collection);
        Ok(())
    }

    async fn merge(&self, collection: &CollectionPath, id: &str, write: DocumentWrite) -> PortResult<()> {
        {
            let mut state = self.inner.lock()?;
            let now = state.next_stamp();
            let fields = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?;
            write.apply_to(fields, &now);
        }
        self.inner.notify(collection);
        Ok(())
    }

    async fn update_atomic(
        &self,
        collection: &CollectionPath,
        id: &str,
        mutator: Mutator<'_>,
    ) -> PortResult<bool> {
        let changed = {
            let mut state = self.inner.lock()?;
            let fields = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?;
            // Work on a copy so a failing mutator leaves the document untouched.
            let mut draft = fields.clone();
            let changed = mutator(&mut draft)?;
            if changed {
                *fields = draft;
            }
            changed
        };
        if changed {
            self.inner.notify(collection);
        }
        Ok(changed)
    }

    async fn delete_cascade(
        &self,
        collection: &CollectionPath,
        id: &str,
        sub_collections: &[&str],
    ) -> PortResult<()> {
        let children: Vec<CollectionPath> = sub_collections
            .iter()
            .map(|name| CollectionPath::sub(collection, id, name))
            .collect();
        {
            let mut state = self.inner.lock()?;
            let removed = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id));
            if removed.is_none() {
                return Err(PortError::NotFound(format!("{}/{}", collection, id)));
            }
            for child in &children {
                state.collections.remove(child);
            }
        }
        self.inner.notify(collection);
        for child in &children {
            self.inner.notify(child);
        }
        Ok(())
    }

    async fn subscribe(&self, query: Query) -> PortResult<SnapshotStream> {
        // Subscribe to the feed before the first read so no change slips between them.
        let mut changes = self.inner.changes.subscribe();
        let initial = self.inner.run_query(&query)?;
        let inner = self.inner.clone();

        Ok(Box::pin(async_stream::stream! {
            let mut last = initial.clone();
            yield Ok(initial);
            loop {
                match changes.recv().await {
                    Ok(path) if path != query.collection => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        match inner.run_query(&query) {
                            Ok(snapshot) if snapshot == last => continue,
                            Ok(snapshot) => {
                                last = snapshot.clone();
                                yield Ok(snapshot);
                            }
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::{json, Value};

    fn write(value: Value) -> DocumentWrite {
        DocumentWrite::new(value.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_server_timestamps_are_strictly_increasing() {
        let store = InMemoryDocumentStore::new();
        let col = CollectionPath::candidates();
        let a = store.add(&col, write(json!({})).stamp("updatedAt")).await.unwrap();
        let b = store.add(&col, write(json!({})).stamp("updatedAt")).await.unwrap();
        let a = store.get(&col, &a).await.unwrap().unwrap();
        let b = store.get(&col, &b).await.unwrap().unwrap();
        let a_at = a.fields["updatedAt"].as_str().unwrap().to_string();
        let b_at = b.fields["updatedAt"].as_str().unwrap().to_string();
        assert!(a_at < b_at);
    }

    #[tokio::test]
    async fn test_merge_missing_document_is_not_found() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .merge(&CollectionPath::candidates(), "nope", write(json!({"a": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_mutator_leaves_document_untouched() {
        let store = InMemoryDocumentStore::new();
        let col = CollectionPath::comments();
        store.set(&col, "c1", write(json!({"likes": 1}))).await.unwrap();
        let result = store
            .update_atomic(
                &col,
                "c1",
                Box::new(|fields| {
                    fields.insert("likes".to_string(), json!(99));
                    Err(PortError::Unexpected("boom".to_string()))
                }),
            )
            .await;
        assert!(result.is_err());
        let doc = store.get(&col, "c1").await.unwrap().unwrap();
        assert_eq!(doc.fields["likes"], json!(1));
    }

    #[tokio::test]
    async fn test_delete_cascade_removes_sub_collection() {
        let store = InMemoryDocumentStore::new();
        let candidates = CollectionPath::candidates();
        let policies = CollectionPath::policies_of("c1");
        store.set(&candidates, "c1", write(json!({}))).await.unwrap();
        store.add(&policies, write(json!({"title": "p"}))).await.unwrap();

        store.delete_cascade(&candidates, "c1", &["policies"]).await.unwrap();

        assert!(store.get(&candidates, "c1").await.unwrap().is_none());
        assert!(store.query(&Query::new(policies)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_emits_initial_and_changed_snapshots() {
        let store = InMemoryDocumentStore::new();
        let col = CollectionPath::comments();
        let mut stream = store
            .subscribe(Query::new(col.clone()).where_eq("candidateId", "c1"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(first.is_empty());

        store.add(&col, write(json!({"candidateId": "other"}))).await.unwrap();
        store.add(&col, write(json!({"candidateId": "c1"}))).await.unwrap();

        // The unrelated insert produces an identical snapshot and is skipped.
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
    }
}
