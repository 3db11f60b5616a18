//! crates/voter_guide_core/src/aggregation.rs
//!
//! Pure statistics over candidates that have already been fetched.
//! `feasibility_score` is the only policy score that feeds any of these.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{Candidate, Policy};

/// Rounded mean of the candidate's policy scores, or 0 with no policies.
pub fn average_feasibility(candidate: &Candidate) -> u32 {
    rounded_mean(
        candidate
            .policies
            .iter()
            .map(|p| f64::from(p.feasibility_score)),
    )
    .unwrap_or(0)
}

/// Rounded mean of each candidate's own average. Candidates with no policies
/// are left out of both the sum and the count.
pub fn aggregate_average_feasibility(candidates: &[Candidate]) -> u32 {
    rounded_mean(
        candidates
            .iter()
            .filter(|c| !c.policies.is_empty())
            .map(|c| f64::from(average_feasibility(c))),
    )
    .unwrap_or(0)
}

/// A policy together with the candidate that holds it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPolicy {
    pub candidate_id: String,
    pub candidate_name: String,
    pub policy: Policy,
}

/// The `n` best-scored policies across all candidates. Ties keep encounter order.
pub fn top_policies(candidates: &[Candidate], n: usize) -> Vec<RankedPolicy> {
    let mut ranked: Vec<RankedPolicy> = candidates
        .iter()
        .flat_map(|c| {
            c.policies.iter().map(move |p| RankedPolicy {
                candidate_id: c.id.clone(),
                candidate_name: c.name.clone(),
                policy: p.clone(),
            })
        })
        .collect();
    // `sort_by` is stable.
    ranked.sort_by(|a, b| b.policy.feasibility_score.cmp(&a.policy.feasibility_score));
    ranked.truncate(n);
    ranked
}

/// Counts candidates per observed value of `field`.
pub fn count_by<F, K>(candidates: &[Candidate], field: F) -> BTreeMap<String, usize>
where
    F: Fn(&Candidate) -> K,
    K: Into<String>,
{
    let mut counts = BTreeMap::new();
    for candidate in candidates {
        *counts.entry(field(candidate).into()).or_insert(0) += 1;
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateStatistics {
    pub total_candidates: usize,
    pub total_policies: usize,
    pub average_feasibility: u32,
    pub by_status: BTreeMap<String, usize>,
    pub by_prefecture: BTreeMap<String, usize>,
    pub by_party: BTreeMap<String, usize>,
    pub by_election_type: BTreeMap<String, usize>,
    pub top_policies: Vec<RankedPolicy>,
}

impl CandidateStatistics {
    pub fn compute(candidates: &[Candidate], top_n: usize) -> Self {
        Self {
            total_candidates: candidates.len(),
            total_policies: candidates.iter().map(|c| c.policies.len()).sum(),
            average_feasibility: aggregate_average_feasibility(candidates),
            by_status: count_by(candidates, |c| c.status.as_str()),
            by_prefecture: count_by(candidates, |c| c.prefecture.clone()),
            by_party: count_by(candidates, |c| c.party.clone()),
            by_election_type: count_by(candidates, |c| c.election_type.clone()),
            top_policies: top_policies(candidates, top_n),
        }
    }
}

fn rounded_mean(values: impl Iterator<Item = f64>) -> Option<u32> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return None;
    }
    Some((sum / count as f64).round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AnalyzerKind, CandidateStatus, DetailedEvaluation, EvaluationDetail, Impact,
    };
    use chrono::Utc;

    fn detail() -> EvaluationDetail {
        EvaluationDetail {
            score: 50,
            summary: String::new(),
            report: String::new(),
            references: Vec::new(),
            keywords: None,
        }
    }

    fn policy(id: &str, score: u8) -> Policy {
        Policy {
            id: id.to_string(),
            title: id.to_string(),
            category: "economy".to_string(),
            description: String::new(),
            impact: Impact::Medium,
            feasibility_score: score,
            detailed_evaluation: DetailedEvaluation {
                technical: detail(),
                political: detail(),
                financial: detail(),
                timeline: detail(),
            },
            analyzed_by: AnalyzerKind::Manual,
            analyzed_at: Utc::now(),
        }
    }

    fn candidate(id: &str, party: &str, scores: &[u8]) -> Candidate {
        Candidate {
            id: id.to_string(),
            name: format!("Candidate {}", id),
            age: 45,
            party: party.to_string(),
            status: CandidateStatus::Newcomer,
            prefecture: "Tokyo".to_string(),
            election_type: "house".to_string(),
            election_date: "2025-07-20".to_string(),
            slogan: String::new(),
            photo_url: String::new(),
            achievements: Vec::new(),
            color: String::new(),
            policies: scores
                .iter()
                .enumerate()
                .map(|(i, s)| policy(&format!("{}-p{}", id, i), *s))
                .collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_average_feasibility_rounds_mean() {
        assert_eq!(average_feasibility(&candidate("a", "x", &[80, 60, 40])), 60);
        assert_eq!(average_feasibility(&candidate("b", "x", &[70, 75])), 73);
    }

    #[test]
    fn test_average_feasibility_without_policies_is_zero() {
        assert_eq!(average_feasibility(&candidate("a", "x", &[])), 0);
    }

    #[test]
    fn test_aggregate_average_skips_candidates_without_policies() {
        let candidates = vec![
            candidate("a", "x", &[80, 60, 40]),
            candidate("b", "x", &[]),
            candidate("c", "x", &[90]),
        ];
        // mean(60, 90) = 75; the empty candidate would pull it to 50.
        assert_eq!(aggregate_average_feasibility(&candidates), 75);
        assert_eq!(aggregate_average_feasibility(&[]), 0);
    }

    #[test]
    fn test_top_policies_is_stable_on_ties() {
        let candidates = vec![candidate("a", "x", &[70, 90]), candidate("b", "y", &[90, 10])];
        let top = top_policies(&candidates, 3);
        let ids: Vec<_> = top.iter().map(|r| r.policy.id.as_str()).collect();
        assert_eq!(ids, vec!["a-p1", "b-p0", "a-p0"]);
        assert_eq!(top[1].candidate_id, "b");
    }

    #[test]
    fn test_statistics_group_counts() {
        let candidates = vec![
            candidate("a", "Green", &[50]),
            candidate("b", "Green", &[]),
            candidate("c", "Blue", &[]),
        ];
        let stats = CandidateStatistics::compute(&candidates, 5);
        assert_eq!(stats.total_candidates, 3);
        assert_eq!(stats.total_policies, 1);
        assert_eq!(stats.by_party.get("Green"), Some(&2));
        assert_eq!(stats.by_party.get("Blue"), Some(&1));
        assert_eq!(stats.by_status.get("newcomer"), Some(&3));
        assert_eq!(stats.by_prefecture.len(), 1);
    }
}
