//! crates/voter_guide_core/src/domain.rs
//!
//! Defines the core data structures for the application: candidates, their
//! evaluated policies, comments and users, plus the input types accepted by
//! the data access layer.
//!
//! Wire and document field names are camelCase, matching the stored documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::{PortError, PortResult};

//=========================================================================================
// Candidates
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Incumbent,
    Newcomer,
    Former,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Incumbent => "incumbent",
            CandidateStatus::Newcomer => "newcomer",
            CandidateStatus::Former => "former",
        }
    }
}

impl std::str::FromStr for CandidateStatus {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incumbent" => Ok(CandidateStatus::Incumbent),
            "newcomer" => Ok(CandidateStatus::Newcomer),
            "former" => Ok(CandidateStatus::Former),
            other => Err(PortError::Validation(format!("unknown candidate status '{}'", other))),
        }
    }
}

/// A candidate with its policies attached.
///
/// `policies` never lives in the candidate document; it is always resolved from
/// the `candidates/{id}/policies` sub-collection before a `Candidate` is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub party: String,
    pub status: CandidateStatus,
    pub prefecture: String,
    pub election_type: String,
    pub election_date: String,
    pub slogan: String,
    pub photo_url: String,
    pub achievements: Vec<String>,
    pub color: String,
    pub policies: Vec<Policy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields required to create a candidate. Policies are added separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCandidate {
    pub name: String,
    pub age: u32,
    pub party: String,
    pub status: CandidateStatus,
    pub prefecture: String,
    pub election_type: String,
    pub election_date: String,
    #[serde(default)]
    pub slogan: String,
    #[serde(default)]
    pub photo_url: String,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub color: String,
}

impl NewCandidate {
    pub fn validate(&self) -> PortResult<()> {
        require_text("name", &self.name)?;
        require_text("party", &self.party)?;
        require_text("prefecture", &self.prefecture)?;
        require_text("electionType", &self.election_type)?;
        require_text("electionDate", &self.election_date)?;
        if self.age == 0 {
            return Err(PortError::Validation("age must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// A partial update to a candidate document. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CandidateStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slogan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achievements: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CandidatePatch {
    pub fn validate(&self) -> PortResult<()> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if self.age == Some(0) {
            return Err(PortError::Validation("age must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Optional predicates for listing candidates. Absent (or empty) options impose no predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub election_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<CandidateStatus>>,
}

//=========================================================================================
// Policies
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
}

/// Who produced a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    Gemini,
    Claude,
    Perplexity,
    Manual,
}

impl AnalyzerKind {
    /// Parses the name of an external analyzer. `manual` is not an analyzer.
    pub fn parse_external(name: &str) -> Option<Self> {
        match name {
            "gemini" => Some(AnalyzerKind::Gemini),
            "claude" => Some(AnalyzerKind::Claude),
            "perplexity" => Some(AnalyzerKind::Perplexity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerKind::Gemini => "gemini",
            AnalyzerKind::Claude => "claude",
            AnalyzerKind::Perplexity => "perplexity",
            AnalyzerKind::Manual => "manual",
        }
    }
}

/// One facet of a policy evaluation. Display only; never aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetail {
    pub score: u8,
    pub summary: String,
    pub report: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedEvaluation {
    pub technical: EvaluationDetail,
    pub political: EvaluationDetail,
    pub financial: EvaluationDetail,
    pub timeline: EvaluationDetail,
}

impl DetailedEvaluation {
    fn validate(&self) -> PortResult<()> {
        for (facet, detail) in [
            ("technical", &self.technical),
            ("political", &self.political),
            ("financial", &self.financial),
            ("timeline", &self.timeline),
        ] {
            if detail.score > 100 {
                return Err(PortError::Validation(format!(
                    "{} score must be between 0 and 100",
                    facet
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: String,
    pub title: String,
    pub category: String,
    pub description: String,
    pub impact: Impact,
    /// The only score used for sorting and aggregation.
    pub feasibility_score: u8,
    pub detailed_evaluation: DetailedEvaluation,
    pub analyzed_by: AnalyzerKind,
    pub analyzed_at: DateTime<Utc>,
}

/// The fields required to add a policy. `analyzedAt` is stamped by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPolicy {
    pub title: String,
    pub category: String,
    pub description: String,
    pub impact: Impact,
    pub feasibility_score: u8,
    pub detailed_evaluation: DetailedEvaluation,
    pub analyzed_by: AnalyzerKind,
}

impl NewPolicy {
    pub fn validate(&self) -> PortResult<()> {
        require_text("title", &self.title)?;
        validate_feasibility(self.feasibility_score)?;
        self.detailed_evaluation.validate()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<Impact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feasibility_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_evaluation: Option<DetailedEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzed_by: Option<AnalyzerKind>,
}

impl PolicyPatch {
    pub fn validate(&self) -> PortResult<()> {
        if let Some(score) = self.feasibility_score {
            validate_feasibility(score)?;
        }
        if let Some(evaluation) = &self.detailed_evaluation {
            evaluation.validate()?;
        }
        Ok(())
    }
}

//=========================================================================================
// Comments
//=========================================================================================

/// Soft-delete flag. Only `Active` comments are ever listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    Active,
    Hidden,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub candidate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    /// Always equal to `liked_by.len()`.
    pub likes: u32,
    pub liked_by: Vec<String>,
    pub status: CommentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    #[serde(default)]
    pub candidate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
}

impl NewComment {
    pub fn validate(&self) -> PortResult<()> {
        require_text("candidateId", &self.candidate_id)?;
        require_text("userId", &self.user_id)?;
        require_text("text", &self.text)
    }
}

//=========================================================================================
// Users and identities
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefecture: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A verified identity issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    /// The custom `admin` claim.
    pub admin: bool,
}

impl Identity {
    /// Admin if the token carries the admin claim or the email is allow-listed.
    pub fn is_admin(&self, admin_emails: &[String]) -> bool {
        self.admin || self.is_allow_listed(admin_emails)
    }

    pub fn is_allow_listed(&self, admin_emails: &[String]) -> bool {
        match &self.email {
            Some(email) => admin_emails.iter().any(|a| a.eq_ignore_ascii_case(email)),
            None => false,
        }
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn require_text(field: &str, value: &str) -> PortResult<()> {
    if value.trim().is_empty() {
        return Err(PortError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_feasibility(score: u8) -> PortResult<()> {
    if score > 100 {
        return Err(PortError::Validation(
            "feasibilityScore must be between 0 and 100".to_string(),
        ));
    }
    Ok(())
}

//=========================================================================================
// Scraped pages
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeMetadata {
    pub scraped_at: DateTime<Utc>,
    pub word_count: usize,
    pub content_type: String,
}

/// A web page reduced to readable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedPage {
    pub content: String,
    pub title: String,
    pub metadata: ScrapeMetadata,
}
