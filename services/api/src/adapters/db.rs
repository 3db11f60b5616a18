//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DocumentStore` port from the `core` crate. Every collection lives in a
//! single `documents` table keyed by `(collection, id)` with a JSONB body.
//! Change notifications for live queries ride on Postgres `LISTEN/NOTIFY`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgListener, PgPool};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::{debug, error};
use uuid::Uuid;
use voter_guide_core::ports::{DocumentStore, Mutator, PortError, PortResult, SnapshotStream};
use voter_guide_core::query::{
    format_timestamp, CollectionPath, Direction, DocumentWrite, Fields, Predicate, Query,
    StoredDocument,
};

/// The channel the `documents` trigger notifies with the changed collection path.
const CHANGE_CHANNEL: &str = "document_changes";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DocumentStore` port.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Locks one document for the rest of a transaction, lets `apply` edit it and
    /// writes it back if `apply` reports a change.
    async fn edit_locked<F>(&self, collection: &CollectionPath, id: &str, apply: F) -> PortResult<bool>
    where
        F: FnOnce(&mut Fields) -> PortResult<bool> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let record = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, data FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?;

        let mut fields = record.data.0;
        if !apply(&mut fields)? {
            return Ok(false);
        }

        sqlx::query("UPDATE documents SET data = $3 WHERE collection = $1 AND id = $2")
            .bind(collection.as_str())
            .bind(id)
            .bind(Json(&fields))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    id: String,
    data: Json<Fields>,
}
impl DocumentRecord {
    fn to_domain(self) -> StoredDocument {
        StoredDocument {
            id: self.id,
            fields: self.data.0,
        }
    }
}

fn db_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn now_stamp() -> String {
    format_timestamp(Utc::now())
}

/// Builds the SELECT for a `Query`. Field names are always bound, never spliced.
/// Documents missing the order field sort as the lowest value in either direction.
fn select_for(query: &Query) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::new("SELECT id, data FROM documents WHERE collection = ");
    qb.push_bind(query.collection.as_str());
    for predicate in &query.predicates {
        match predicate {
            Predicate::Eq(field, value) => {
                qb.push(" AND data -> ");
                qb.push_bind(field.as_str());
                qb.push(" = ");
                qb.push_bind(Json(value.clone()));
            }
            Predicate::In(field, values) => {
                qb.push(" AND data -> ");
                qb.push_bind(field.as_str());
                qb.push(" IN (SELECT jsonb_array_elements(");
                qb.push_bind(Json(serde_json::Value::Array(values.clone())));
                qb.push("))");
            }
        }
    }
    if let Some(order) = &query.order_by {
        qb.push(" ORDER BY data -> ");
        qb.push_bind(order.field.as_str());
        qb.push(match order.direction {
            Direction::Asc => " ASC NULLS FIRST",
            Direction::Desc => " DESC NULLS LAST",
        });
        qb.push(", id ASC");
    }
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
    }
    qb
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &CollectionPath, id: &str) -> PortResult<Option<StoredDocument>> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(DocumentRecord::to_domain))
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<StoredDocument>> {
        let mut qb = select_for(query);
        let records = qb
            .build_query_as::<DocumentRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(records.into_iter().map(DocumentRecord::to_domain).collect())
    }

    async fn add(&self, collection: &CollectionPath, write: DocumentWrite) -> PortResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.set(collection, &id, write).await?;
        Ok(id)
    }

    async fn set(&self, collection: &CollectionPath, id: &str, write: DocumentWrite) -> PortResult<()> {
        let mut fields = Fields::new();
        write.apply_to(&mut fields, &now_stamp());
        sqlx::query(
            "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) \
             ON CONFLICT (collection, id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(Json(&fields))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        debug!("set {}/{}", collection, id);
        Ok(())
    }

    async fn merge(&self, collection: &CollectionPath, id: &str, write: DocumentWrite) -> PortResult<()> {
        let now = now_stamp();
        self.edit_locked(collection, id, move |fields| {
            write.apply_to(fields, &now);
            Ok(true)
        })
        .await?;
        Ok(())
    }

    async fn update_atomic(
        &self,
        collection: &CollectionPath,
        id: &str,
        mutator: Mutator<'_>,
    ) -> PortResult<bool> {
        self.edit_locked(collection, id, mutator).await
    }

    async fn delete_cascade(
        &self,
        collection: &CollectionPath,
        id: &str,
        sub_collections: &[&str],
    ) -> PortResult<()> {
        let children: Vec<String> = sub_collections
            .iter()
            .map(|name| CollectionPath::sub(collection, id, name).as_str().to_string())
            .collect();

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let deleted = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if deleted.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("{}/{}", collection, id)));
        }
        sqlx::query("DELETE FROM documents WHERE collection = ANY($1)")
            .bind(&children)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn subscribe(&self, query: Query) -> PortResult<SnapshotStream> {
        // Listen before the first read so no change slips between them.
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(db_error)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(db_error)?;
        let initial = self.query(&query).await?;
        let store = self.clone();

        Ok(Box::pin(async_stream::stream! {
            let mut last = initial.clone();
            yield Ok(initial);
            loop {
                match listener.recv().await {
                    Ok(notification) if notification.payload() != query.collection.as_str() => continue,
                    Ok(_) => match store.query(&query).await {
                        Ok(snapshot) if snapshot == last => continue,
                        Ok(snapshot) => {
                            last = snapshot.clone();
                            yield Ok(snapshot);
                        }
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    },
                    Err(e) => {
                        error!("Change listener for {} failed: {}", query.collection, e);
                        yield Err(db_error(e));
                        break;
                    }
                }
            }
        }))
    }
}
