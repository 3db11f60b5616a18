//! crates/voter_guide_core/src/data_access.rs
//!
//! Maps domain operations onto `DocumentStore` calls. Candidates are stored in the
//! root `candidates` collection and their policies in `candidates/{id}/policies`;
//! every candidate handed out of this module has its policies attached.
//!
//! Nothing here retries or swallows errors. Retry for reads belongs to the
//! query cache.

use chrono::{DateTime, Utc};
use futures::{future, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::{
    Candidate, CandidateFilters, CandidatePatch, CandidateStatus, Comment, Identity, NewCandidate,
    NewComment, NewPolicy, Policy, PolicyPatch, User, UserRole,
};
use crate::ports::{DocumentStore, PortError, PortResult};
use crate::query::{CollectionPath, Direction, DocumentWrite, Fields, Query, POLICIES};

/// Most recent comments returned by a comment query.
pub const COMMENT_LIMIT: usize = 50;

pub type CommentStream = Pin<Box<dyn Stream<Item = PortResult<Vec<Comment>>> + Send>>;

//=========================================================================================
// Candidate Document Record
//=========================================================================================

/// A candidate document as stored, without its policies. Never leaves this module.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateRecord {
    id: String,
    name: String,
    age: u32,
    party: String,
    status: CandidateStatus,
    prefecture: String,
    election_type: String,
    election_date: String,
    #[serde(default)]
    slogan: String,
    #[serde(default)]
    photo_url: String,
    #[serde(default)]
    achievements: Vec<String>,
    #[serde(default)]
    color: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CandidateRecord {
    fn into_domain(self, policies: Vec<Policy>) -> Candidate {
        Candidate {
            id: self.id,
            name: self.name,
            age: self.age,
            party: self.party,
            status: self.status,
            prefecture: self.prefecture,
            election_type: self.election_type,
            election_date: self.election_date,
            slogan: self.slogan,
            photo_url: self.photo_url,
            achievements: self.achievements,
            color: self.color,
            policies,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

//=========================================================================================
// Comment Subscription Handle
//=========================================================================================

/// A live comment subscription. Each handle owns its own cancellation token;
/// cancelling one never affects another. Dropping the handle also cancels it.
pub struct CommentSubscription {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CommentSubscription {
    pub fn unsubscribe(self) {
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for CommentSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

//=========================================================================================
// The Data Access Layer
//=========================================================================================

#[derive(Clone)]
pub struct DataAccess {
    pub(crate) store: Arc<dyn DocumentStore>,
}

impl DataAccess {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    // --- Candidates ---

    pub async fn list_candidates(&self, filters: &CandidateFilters) -> PortResult<Vec<Candidate>> {
        let query = candidate_query(filters)?;
        let docs = self.store.query(&query).await?;
        debug!("Listing {} candidates, resolving policies", docs.len());

        // One policy query per candidate; fine for tens of candidates.
        let candidates = future::try_join_all(docs.into_iter().map(|doc| async move {
            let record: CandidateRecord = doc.decode()?;
            let policies = self.list_policies(&record.id).await?;
            Ok::<_, PortError>(record.into_domain(policies))
        }))
        .await?;
        Ok(candidates)
    }

    /// Returns `Ok(None)` when the candidate does not exist.
    pub async fn get_candidate(&self, id: &str) -> PortResult<Option<Candidate>> {
        require_id("candidate id", id)?;
        let Some(doc) = self.store.get(&CollectionPath::candidates(), id).await? else {
            return Ok(None);
        };
        let record: CandidateRecord = doc.decode()?;
        let policies = self.list_policies(id).await?;
        Ok(Some(record.into_domain(policies)))
    }

    pub async fn create_candidate(&self, data: &NewCandidate) -> PortResult<String> {
        data.validate()?;
        let write = DocumentWrite::from_serialize(data)?
            .stamp("createdAt")
            .stamp("updatedAt");
        let id = self.store.add(&CollectionPath::candidates(), write).await?;
        info!("Created candidate {}", id);
        Ok(id)
    }

    /// Merges the given fields and re-stamps `updatedAt`. Policies are never touched.
    pub async fn update_candidate(&self, id: &str, patch: &CandidatePatch) -> PortResult<()> {
        require_id("candidate id", id)?;
        patch.validate()?;
        let write = DocumentWrite::from_serialize(patch)?.stamp("updatedAt");
        self.store.merge(&CollectionPath::candidates(), id, write).await?;
        info!("Updated candidate {}", id);
        Ok(())
    }

    /// Deletes a candidate together with its policy sub-collection in one transaction.
    pub async fn delete_candidate(&self, id: &str) -> PortResult<()> {
        require_id("candidate id", id)?;
        self.store
            .delete_cascade(&CollectionPath::candidates(), id, &[POLICIES])
            .await?;
        info!("Deleted candidate {} and its policies", id);
        Ok(())
    }

    // --- Policies ---

    pub async fn list_policies(&self, candidate_id: &str) -> PortResult<Vec<Policy>> {
        let query = Query::new(CollectionPath::policies_of(candidate_id))
            .order_by("analyzedAt", Direction::Desc);
        self.store
            .query(&query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    pub async fn add_policy(&self, candidate_id: &str, data: &NewPolicy) -> PortResult<String> {
        require_id("candidate id", candidate_id)?;
        data.validate()?;
        if self
            .store
            .get(&CollectionPath::candidates(), candidate_id)
            .await?
            .is_none()
        {
            return Err(PortError::NotFound(format!("Candidate {} not found", candidate_id)));
        }
        let write = DocumentWrite::from_serialize(data)?.stamp("analyzedAt");
        let id = self
            .store
            .add(&CollectionPath::policies_of(candidate_id), write)
            .await?;
        info!("Added policy {} to candidate {}", id, candidate_id);
        Ok(id)
    }

    pub async fn update_policy(
        &self,
        candidate_id: &str,
        policy_id: &str,
        patch: &PolicyPatch,
    ) -> PortResult<()> {
        require_id("candidate id", candidate_id)?;
        require_id("policy id", policy_id)?;
        patch.validate()?;
        let write = DocumentWrite::from_serialize(patch)?;
        self.store
            .merge(&CollectionPath::policies_of(candidate_id), policy_id, write)
            .await
    }

    // --- Comments ---

    pub async fn list_comments(
        &self,
        candidate_id: &str,
        policy_id: Option<&str>,
    ) -> PortResult<Vec<Comment>> {
        require_id("candidate id", candidate_id)?;
        let query = comment_query(candidate_id, policy_id);
        self.store
            .query(&query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    /// A live stream of the current comment set, re-emitted in full on every change.
    pub async fn watch_comments(
        &self,
        candidate_id: &str,
        policy_id: Option<&str>,
    ) -> PortResult<CommentStream> {
        require_id("candidate id", candidate_id)?;
        let snapshots = self
            .store
            .subscribe(comment_query(candidate_id, policy_id))
            .await?;
        Ok(Box::pin(snapshots.map(|snapshot| {
            snapshot.and_then(|docs| {
                docs.iter()
                    .map(|doc| doc.decode::<Comment>())
                    .collect::<PortResult<Vec<_>>>()
            })
        })))
    }

    /// Calls `on_change` with the full comment set until the returned handle is
    /// unsubscribed or dropped. A stream error is logged and ends the subscription.
    pub async fn subscribe_comments<F>(
        &self,
        candidate_id: &str,
        policy_id: Option<&str>,
        mut on_change: F,
    ) -> PortResult<CommentSubscription>
    where
        F: FnMut(Vec<Comment>) + Send + 'static,
    {
        let mut stream = self.watch_comments(candidate_id, policy_id).await?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let candidate_id = candidate_id.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(comments)) => on_change(comments),
                        Some(Err(e)) => {
                            error!("Comment subscription for candidate {} failed: {}", candidate_id, e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!("Comment subscription for candidate {} closed", candidate_id);
        });

        Ok(CommentSubscription { token, task })
    }

    pub async fn add_comment(&self, data: &NewComment) -> PortResult<String> {
        data.validate()?;
        let mut write = DocumentWrite::default()
            .set("candidateId", data.candidate_id.as_str())
            .set("userId", data.user_id.as_str())
            .set("userName", data.user_name.as_str())
            .set("text", data.text.as_str())
            .set("likes", 0)
            .set("likedBy", Value::Array(Vec::new()))
            .set("status", "active")
            .stamp("createdAt");
        if let Some(policy_id) = &data.policy_id {
            write = write.set("policyId", policy_id.as_str());
        }
        self.store.add(&CollectionPath::comments(), write).await
    }

    /// Adds `user_id` to the comment's likers. Returns `false` if it was already there.
    pub async fn like_comment(&self, comment_id: &str, user_id: &str) -> PortResult<bool> {
        self.toggle_like(comment_id, user_id, true).await
    }

    /// Removes `user_id` from the comment's likers. Returns `false` if it was absent.
    pub async fn unlike_comment(&self, comment_id: &str, user_id: &str) -> PortResult<bool> {
        self.toggle_like(comment_id, user_id, false).await
    }

    async fn toggle_like(&self, comment_id: &str, user_id: &str, like: bool) -> PortResult<bool> {
        require_id("comment id", comment_id)?;
        require_id("user id", user_id)?;
        let user = user_id.to_string();
        self.store
            .update_atomic(
                &CollectionPath::comments(),
                comment_id,
                Box::new(move |fields| apply_like(fields, &user, like)),
            )
            .await
    }

    // --- Users ---

    pub async fn get_user(&self, uid: &str) -> PortResult<Option<User>> {
        require_id("user id", uid)?;
        self.store
            .get(&CollectionPath::users(), uid)
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    /// Creates the user document on first sign-in. Allow-listed emails are created
    /// as, or upgraded to, admins on every sign-in.
    pub async fn sync_user_on_sign_in(
        &self,
        identity: &Identity,
        admin_emails: &[String],
    ) -> PortResult<User> {
        let users = CollectionPath::users();
        let bootstrap_admin = identity.is_allow_listed(admin_emails);

        match self.get_user(&identity.uid).await? {
            None => {
                let email = identity.email.clone().unwrap_or_default();
                let name = identity
                    .name
                    .clone()
                    .or_else(|| email.split('@').next().map(str::to_string))
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "Anonymous".to_string());
                let role = if bootstrap_admin { UserRole::Admin } else { UserRole::User };
                let mut write = DocumentWrite::default()
                    .set("email", email)
                    .set("name", name)
                    .set("role", serde_value(&role)?)
                    .stamp("createdAt")
                    .stamp("updatedAt");
                if let Some(picture) = &identity.picture {
                    write = write.set("avatar", picture.as_str());
                }
                self.store.set(&users, &identity.uid, write).await?;
                info!("Created user {} with role {:?}", identity.uid, role);
            }
            Some(user) if bootstrap_admin && user.role != UserRole::Admin => {
                let write = DocumentWrite::default()
                    .set("role", serde_value(&UserRole::Admin)?)
                    .stamp("updatedAt");
                self.store.merge(&users, &identity.uid, write).await?;
                info!("Upgraded allow-listed user {} to admin", identity.uid);
            }
            Some(user) => return Ok(user),
        }

        self.get_user(&identity.uid)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", identity.uid)))
    }
}

//=========================================================================================
// Query Builders and Helpers
//=========================================================================================

fn candidate_query(filters: &CandidateFilters) -> PortResult<Query> {
    let mut query = Query::new(CollectionPath::candidates());
    if let Some(prefecture) = &filters.prefecture {
        query = query.where_eq("prefecture", prefecture.as_str());
    }
    if let Some(election_type) = &filters.election_type {
        query = query.where_eq("electionType", election_type.as_str());
    }
    if let Some(parties) = filters.party.as_ref().filter(|p| !p.is_empty()) {
        query = query.where_in("party", parties.iter().map(|p| Value::from(p.as_str())).collect());
    }
    if let Some(statuses) = filters.status.as_ref().filter(|s| !s.is_empty()) {
        let values = statuses.iter().map(serde_value).collect::<PortResult<Vec<_>>>()?;
        query = query.where_in("status", values);
    }
    Ok(query.order_by("updatedAt", Direction::Desc))
}

fn comment_query(candidate_id: &str, policy_id: Option<&str>) -> Query {
    let mut query = Query::new(CollectionPath::comments())
        .where_eq("candidateId", candidate_id)
        .where_eq("status", "active");
    if let Some(policy_id) = policy_id {
        query = query.where_eq("policyId", policy_id);
    }
    query
        .order_by("createdAt", Direction::Desc)
        .limit(COMMENT_LIMIT)
}

/// Adjusts `likedBy` and `likes` for one user. `likes` never drops below zero.
fn apply_like(fields: &mut Fields, user_id: &str, like: bool) -> PortResult<bool> {
    let mut liked_by: Vec<String> = match fields.get("likedBy") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| PortError::Unexpected(format!("malformed likedBy: {}", e)))?,
        None => Vec::new(),
    };
    let likes = fields.get("likes").and_then(Value::as_u64).unwrap_or(0);
    let present = liked_by.iter().any(|u| u == user_id);

    let likes = match (like, present) {
        (true, false) => {
            liked_by.push(user_id.to_string());
            likes + 1
        }
        (false, true) => {
            liked_by.retain(|u| u != user_id);
            likes.saturating_sub(1)
        }
        _ => return Ok(false),
    };

    fields.insert("likedBy".to_string(), Value::from(liked_by));
    fields.insert("likes".to_string(), Value::from(likes));
    Ok(true)
}

fn serde_value<T: serde::Serialize>(value: &T) -> PortResult<Value> {
    serde_json::to_value(value).map_err(|e| PortError::Unexpected(e.to_string()))
}

fn require_id(what: &str, id: &str) -> PortResult<()> {
    if id.trim().is_empty() || id.contains('/') {
        return Err(PortError::Validation(format!("invalid {} '{}'", what, id)));
    }
    Ok(())
}
