//! Consensus engine — cross-scores votes and selects the winner.
//!
//! Agreement between two votes is a token-set overlap over normalized
//! content: Jaccard over unigrams and bigrams, weighted half and half.
//! Each vote's agreement score is its mean similarity to every other
//! valid vote. The winner maximizes `0.6 * confidence + 0.4 * agreement`
//! with deterministic tie-breaks, so identical inputs always elect the
//! same vote.

use crate::error::EngineError;
use crate::types::{Consensus, QualityBand, Vote};
use std::collections::{BTreeSet, HashSet};

const CONFIDENCE_WEIGHT: f64 = 0.6;
const AGREEMENT_WEIGHT: f64 = 0.4;

/// Lowercase and collapse whitespace runs to single spaces.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn unigrams(text: &str) -> HashSet<String> {
    text.split_whitespace().map(String::from).collect()
}

fn bigrams(text: &str) -> HashSet<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        // Two empty sets are identical.
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Similarity between two answers, in `[0, 1]`. Symmetric, and 1 for
/// identical non-empty content.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    0.5 * jaccard(&unigrams(&a), &unigrams(&b)) + 0.5 * jaccard(&bigrams(&a), &bigrams(&b))
}

/// Fill every vote's `agreement_score`: mean similarity to the other
/// valid votes, 0 for error votes and for a lone valid vote.
pub fn score_agreement(votes: &mut [Vote]) {
    let valid: Vec<(usize, String)> = votes
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_valid())
        .map(|(i, v)| (i, v.content.clone()))
        .collect();

    for vote in votes.iter_mut() {
        vote.agreement_score = 0.0;
    }
    if valid.len() < 2 {
        return;
    }

    for (i, content) in &valid {
        let mut total = 0.0;
        for (j, other) in &valid {
            if i != j {
                total += similarity(content, other);
            }
        }
        votes[*i].agreement_score = total / (valid.len() - 1) as f64;
    }
}

fn composite(vote: &Vote) -> f64 {
    CONFIDENCE_WEIGHT * vote.confidence + AGREEMENT_WEIGHT * vote.agreement_score
}

/// Pick the winning vote index among valid votes. Ties break on higher
/// confidence, then lower cost, then lexicographically smaller provider
/// name.
fn select_winner(votes: &[Vote]) -> Option<usize> {
    votes
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_valid())
        .max_by(|(_, a), (_, b)| {
            composite(a)
                .partial_cmp(&composite(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                // Lower cost wins, so compare reversed.
                .then_with(|| {
                    b.cost_usd
                        .partial_cmp(&a.cost_usd)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                // Lexicographically smaller name wins.
                .then_with(|| b.provider_name.cmp(&a.provider_name))
        })
        .map(|(i, _)| i)
}

fn quality_band(mean_agreement: f64, mean_confidence: f64) -> QualityBand {
    if mean_agreement >= 0.75 && mean_confidence >= 0.8 {
        QualityBand::High
    } else if mean_agreement >= 0.5 {
        QualityBand::Medium
    } else {
        QualityBand::Low
    }
}

/// Aggregate collected votes into one [`Consensus`].
///
/// Error votes are kept in the debug list but excluded from scoring.
/// Fails with [`EngineError::NoValidVotes`] when nothing is left to score.
pub fn build_consensus(mut votes: Vec<Vote>, tier_escalated: bool) -> Result<Consensus, EngineError> {
    score_agreement(&mut votes);

    let winner_idx = select_winner(&votes).ok_or(EngineError::NoValidVotes)?;

    let valid: Vec<&Vote> = votes.iter().filter(|v| v.is_valid()).collect();
    let mean_agreement =
        valid.iter().map(|v| v.agreement_score).sum::<f64>() / valid.len() as f64;
    let mean_confidence = valid.iter().map(|v| v.confidence).sum::<f64>() / valid.len() as f64;

    let vendors: BTreeSet<&str> = valid.iter().map(|v| v.vendor.as_str()).collect();
    let providers_used: BTreeSet<String> =
        valid.iter().map(|v| v.provider_name.clone()).collect();

    let winner = &votes[winner_idx];
    let confidence = composite(winner).clamp(0.0, 1.0);

    let mut reasoning = format!(
        "Winner: {} (composite {:.2}). Contributors:",
        winner.provider_name, confidence
    );
    for vote in &valid {
        reasoning.push_str(&format!(
            " {} (confidence {:.2}, agreement {:.2});",
            vote.provider_name, vote.confidence, vote.agreement_score
        ));
    }

    let total_cost_usd = votes.iter().map(|v| v.cost_usd).sum();
    let contributing_votes: Vec<Vote> = votes.iter().filter(|v| v.is_valid()).cloned().collect();

    Ok(Consensus {
        content: winner.content.clone(),
        confidence,
        reasoning,
        quality: quality_band(mean_agreement, mean_confidence),
        wall_bounce_verified: vendors.len() >= 2,
        providers_used,
        tier_escalated,
        total_cost_usd,
        total_latency_ms: 0, // set by the orchestrator from wall-clock time
        contributing_votes,
        all_votes: votes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoteFailure;
    use crate::types::TokenUsage;
    use proptest::prelude::*;

    fn vote(provider: &str, vendor: &str, content: &str, confidence: f64) -> Vote {
        Vote {
            provider_name: provider.to_string(),
            vendor: vendor.to_string(),
            model: format!("{provider}-model"),
            content: content.to_string(),
            confidence,
            reasoning: String::new(),
            cost_usd: 0.01,
            tokens: TokenUsage::default(),
            latency_ms: 100,
            agreement_score: 0.0,
            error: None,
        }
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Use   Blue/Green\n deployments "), "use blue/green deployments");
    }

    #[test]
    fn test_similarity_identity_and_symmetry() {
        let a = "use blue green deployments";
        let b = "adopt blue green deployment with dual writes";
        assert!((similarity(a, a) - 1.0).abs() < 1e-9);
        assert!((similarity(a, b) - similarity(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_disjoint_is_zero() {
        assert_eq!(similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn test_similarity_empty_cases() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("", "something"), 0.0);
    }

    #[test]
    fn test_agreement_zero_for_lone_valid_vote() {
        let mut votes = vec![
            vote("a", "va", "only answer here", 0.9),
            Vote::failed(
                "b",
                "vb",
                "m",
                VoteFailure::Backend {
                    message: "down".into(),
                },
                5,
            ),
        ];
        score_agreement(&mut votes);
        assert_eq!(votes[0].agreement_score, 0.0);
        assert_eq!(votes[1].agreement_score, 0.0);
    }

    #[test]
    fn test_agreement_excludes_error_votes() {
        let mut votes = vec![
            vote("a", "va", "restart the database replica", 0.8),
            vote("b", "vb", "restart the database replica", 0.8),
            Vote::failed(
                "c",
                "vc",
                "m",
                VoteFailure::Timeout { deadline_ms: 100 },
                100,
            ),
        ];
        score_agreement(&mut votes);
        assert!((votes[0].agreement_score - 1.0).abs() < 1e-9);
        assert!((votes[1].agreement_score - 1.0).abs() < 1e-9);
        assert_eq!(votes[2].agreement_score, 0.0);
    }

    #[test]
    fn test_winner_prefers_higher_composite() {
        let votes = vec![
            vote("cheap", "va", "completely unrelated answer text", 0.95),
            vote("b", "vb", "restart the ingress controller", 0.7),
            vote("c", "vc", "restart the ingress controller now", 0.7),
        ];
        let consensus = build_consensus(votes, false).unwrap();
        // 0.95 confidence with no agreement: 0.57. The agreeing pair gets
        // 0.6*0.7 + 0.4*high-agreement, which wins.
        assert_ne!(consensus.content, "completely unrelated answer text");
    }

    #[test]
    fn test_tie_breaks_on_confidence_then_cost_then_name() {
        // Identical content so agreement ties; same composite inputs.
        let mut a = vote("alpha", "va", "same answer", 0.8);
        let mut b = vote("beta", "vb", "same answer", 0.8);
        a.cost_usd = 0.02;
        b.cost_usd = 0.01;
        // Same composite, same confidence: lower cost wins.
        let consensus = build_consensus(vec![a.clone(), b.clone()], false).unwrap();
        assert!(consensus.reasoning.starts_with("Winner: beta"));

        // Same composite, same confidence, same cost: smaller name wins.
        b.cost_usd = 0.02;
        let consensus = build_consensus(vec![b, a], false).unwrap();
        assert!(consensus.reasoning.starts_with("Winner: alpha"));
    }

    #[test]
    fn test_parallel_happy_path_scenario() {
        // Two stubbed answers about blue/green deployment.
        let votes = vec![
            vote("a", "openai", "Use blue/green deployments", 0.82),
            vote(
                "b",
                "anthropic",
                "Adopt blue/green deployment with dual writes",
                0.79,
            ),
        ];
        let consensus = build_consensus(votes, false).unwrap();
        assert_eq!(consensus.content, "Use blue/green deployments");
        assert!(consensus.wall_bounce_verified);
        assert!(!consensus.tier_escalated);
        assert!(consensus.confidence > 0.4 && consensus.confidence < 1.0);
        assert_eq!(consensus.contributing_votes.len(), 2);
    }

    #[test]
    fn test_no_valid_votes_fails() {
        let votes = vec![Vote::failed(
            "a",
            "va",
            "m",
            VoteFailure::Backend {
                message: "dead".into(),
            },
            1,
        )];
        let err = build_consensus(votes, false).unwrap_err();
        assert!(matches!(err, EngineError::NoValidVotes));
    }

    #[test]
    fn test_single_vendor_is_not_wall_bounce_verified() {
        let votes = vec![
            vote("a1", "openai", "scale the workers", 0.8),
            vote("a2", "openai", "scale the workers", 0.8),
        ];
        let consensus = build_consensus(votes, false).unwrap();
        assert!(!consensus.wall_bounce_verified);
    }

    #[test]
    fn test_error_votes_kept_in_debug_list() {
        let votes = vec![
            vote("a", "va", "rotate certs", 0.8),
            vote("c", "vc", "rotate the certs", 0.75),
            Vote::failed(
                "b",
                "vb",
                "m",
                VoteFailure::Backend {
                    message: "500".into(),
                },
                40,
            ),
        ];
        let consensus = build_consensus(votes, false).unwrap();
        assert_eq!(consensus.contributing_votes.len(), 2);
        assert_eq!(consensus.all_votes.len(), 3);
        let failed = consensus
            .all_votes
            .iter()
            .find(|v| v.provider_name == "b")
            .unwrap();
        assert!(failed.error.is_some());
        assert_eq!(failed.confidence, 0.0);
        assert!(!consensus.providers_used.contains("b"));
    }

    #[test]
    fn test_quality_bands() {
        assert_eq!(quality_band(0.8, 0.85), QualityBand::High);
        assert_eq!(quality_band(0.6, 0.85), QualityBand::Medium);
        assert_eq!(quality_band(0.4, 0.9), QualityBand::Low);
        // High agreement but mediocre confidence is still medium.
        assert_eq!(quality_band(0.8, 0.7), QualityBand::Medium);
    }

    #[test]
    fn test_total_cost_includes_all_votes() {
        let mut a = vote("a", "va", "answer", 0.8);
        let mut b = vote("b", "vb", "answer", 0.8);
        a.cost_usd = 0.03;
        b.cost_usd = 0.02;
        let consensus = build_consensus(vec![a, b], false).unwrap();
        assert!((consensus.total_cost_usd - 0.05).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_similarity_symmetric(a in "[a-z ]{0,60}", b in "[a-z ]{0,60}") {
            let lhs = similarity(&a, &b);
            let rhs = similarity(&b, &a);
            prop_assert!((lhs - rhs).abs() < 1e-9);
        }

        #[test]
        fn prop_similarity_in_unit_interval(a in "[a-z ]{0,60}", b in "[a-z ]{0,60}") {
            let s = similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn prop_self_similarity_is_one(a in "[a-z]{1,20}( [a-z]{1,20}){0,8}") {
            prop_assert!((similarity(&a, &a) - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_consensus_confidence_in_unit_interval(
            c1 in 0.0f64..=1.0,
            c2 in 0.0f64..=1.0,
        ) {
            let votes = vec![
                vote("a", "va", "shared answer text", c1),
                vote("b", "vb", "shared answer text", c2),
            ];
            let consensus = build_consensus(votes, false).unwrap();
            prop_assert!((0.0..=1.0).contains(&consensus.confidence));
        }
    }
}
