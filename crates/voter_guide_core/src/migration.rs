//! crates/voter_guide_core/src/migration.rs
//!
//! Admin-only data migration: older candidate documents embedded their policies
//! as a `policies` array. The migration moves each entry into the
//! `candidates/{id}/policies` sub-collection and removes the array.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::data_access::DataAccess;
use crate::domain::Identity;
use crate::ports::{PortError, PortResult};
use crate::query::{CollectionPath, DocumentWrite, Query, StoredDocument, POLICIES};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub candidates_migrated: usize,
    pub policies_migrated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub total_candidates: usize,
    pub pending_candidates: usize,
    pub subcollection_policies: usize,
    pub complete: bool,
}

fn require_admin(caller: &Identity, admin_emails: &[String]) -> PortResult<()> {
    if caller.is_admin(admin_emails) {
        Ok(())
    } else {
        warn!("Rejected migration call from non-admin {}", caller.uid);
        Err(PortError::PermissionDenied(
            "this operation requires the admin claim".to_string(),
        ))
    }
}

fn embedded_policies(doc: &StoredDocument) -> Option<&Vec<Value>> {
    doc.fields.get(POLICIES).and_then(Value::as_array)
}

impl DataAccess {
    /// Moves embedded policy arrays into sub-collections. Safe to run repeatedly.
    pub async fn migrate_embedded_policies(
        &self,
        caller: &Identity,
        admin_emails: &[String],
    ) -> PortResult<MigrationReport> {
        require_admin(caller, admin_emails)?;
        let candidates = self.store.query(&Query::new(CollectionPath::candidates())).await?;
        let mut report = MigrationReport::default();

        for doc in &candidates {
            let Some(embedded) = embedded_policies(doc) else {
                continue;
            };
            let target = CollectionPath::policies_of(&doc.id);
            for entry in embedded {
                let Value::Object(fields) = entry else {
                    warn!("Skipping non-object embedded policy in candidate {}", doc.id);
                    continue;
                };
                let mut fields = fields.clone();
                let existing_id = fields
                    .remove("id")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .filter(|id| !id.is_empty() && !id.contains('/'));
                let mut write = DocumentWrite::new(fields);
                if !write.fields.contains_key("analyzedAt") {
                    write = write.stamp("analyzedAt");
                }
                // Reusing the embedded id keeps a re-run from duplicating policies.
                match existing_id {
                    Some(id) => self.store.set(&target, &id, write).await?,
                    None => {
                        self.store.add(&target, write).await?;
                    }
                }
                report.policies_migrated += 1;
            }
            self.store
                .merge(
                    &CollectionPath::candidates(),
                    &doc.id,
                    DocumentWrite::default().remove(POLICIES),
                )
                .await?;
            report.candidates_migrated += 1;
        }

        info!(
            "Migrated {} policies from {} candidates",
            report.policies_migrated, report.candidates_migrated
        );
        Ok(report)
    }

    pub async fn migration_status(
        &self,
        caller: &Identity,
        admin_emails: &[String],
    ) -> PortResult<MigrationStatus> {
        require_admin(caller, admin_emails)?;
        let candidates = self.store.query(&Query::new(CollectionPath::candidates())).await?;
        let pending_candidates = candidates
            .iter()
            .filter(|doc| embedded_policies(doc).is_some())
            .count();

        let mut subcollection_policies = 0;
        for doc in &candidates {
            subcollection_policies += self
                .store
                .query(&Query::new(CollectionPath::policies_of(&doc.id)))
                .await?
                .len();
        }

        Ok(MigrationStatus {
            total_candidates: candidates.len(),
            pending_candidates,
            subcollection_policies,
            complete: pending_candidates == 0,
        })
    }
}
