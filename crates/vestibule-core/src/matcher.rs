//! Probe-vs-registry matching.

use crate::registry::RegistrySnapshot;
use crate::types::{BoundingBox, Embedding, MatchResult, MatchedIdentity, Probe};

/// Similarity reported when no comparison was possible.
pub const NO_COMPARISON: f64 = -1.0;

/// Strategy for classifying one probe embedding against a registry snapshot.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        region: BoundingBox,
        snapshot: &RegistrySnapshot,
        threshold: f64,
    ) -> MatchResult;
}

/// Linear-scan cosine matcher.
///
/// Ties go to the record that appears first in snapshot order, which is
/// enrollment order. Records whose dimension differs from the probe, or whose
/// similarity is not finite, are skipped; the match fails only if every
/// record is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        region: BoundingBox,
        snapshot: &RegistrySnapshot,
        threshold: f64,
    ) -> MatchResult {
        let mut best: Option<(f64, usize)> = None;
        let mut skipped = 0usize;

        for (i, record) in snapshot.iter().enumerate() {
            let sim = match probe.similarity(&record.embedding) {
                Ok(sim) if sim.is_finite() => sim,
                Ok(_) => {
                    skipped += 1;
                    tracing::debug!(identity = %record.identity, id = %record.id, "skipping non-finite similarity");
                    continue;
                }
                Err(err) => {
                    skipped += 1;
                    tracing::debug!(identity = %record.identity, id = %record.id, %err, "skipping incompatible record");
                    continue;
                }
            };
            // Strictly greater: the first of equal maxima wins.
            if best.map_or(true, |(best_sim, _)| sim > best_sim) {
                best = Some((sim, i));
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, total = snapshot.len(), "records skipped as incomparable");
        }

        match best {
            None => MatchResult {
                region,
                best_identity: MatchedIdentity::NoReference,
                similarity: NO_COMPARISON,
                granted: false,
            },
            Some((sim, idx)) if sim >= threshold => MatchResult {
                region,
                best_identity: MatchedIdentity::Member(snapshot.records()[idx].identity.clone()),
                similarity: sim,
                granted: true,
            },
            Some((sim, _)) => MatchResult {
                region,
                best_identity: MatchedIdentity::Unrecognized,
                similarity: sim,
                granted: false,
            },
        }
    }
}

/// Match every probe against the same snapshot.
pub fn evaluate_batch<M: Matcher + ?Sized>(
    matcher: &M,
    probes: &[Probe],
    snapshot: &RegistrySnapshot,
    threshold: f64,
) -> Vec<MatchResult> {
    probes
        .iter()
        .map(|p| matcher.compare(&p.embedding, p.region, snapshot, threshold))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemberRecord;

    fn emb(values: &[f64]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn snapshot(entries: &[(&str, &[f64])]) -> RegistrySnapshot {
        RegistrySnapshot::from_records(
            entries
                .iter()
                .map(|(name, v)| MemberRecord::new(*name, emb(v)))
                .collect(),
        )
    }

    fn region() -> BoundingBox {
        BoundingBox { x: 5, y: 6, width: 40, height: 50 }
    }

    #[test]
    fn test_empty_snapshot_denies_with_sentinel() {
        for probe in [emb(&[1.0, 0.0]), emb(&[]), emb(&[0.0, 0.0, 0.0])] {
            let r = CosineMatcher.compare(&probe, region(), &RegistrySnapshot::default(), 0.68);
            assert!(!r.granted);
            assert_eq!(r.best_identity, MatchedIdentity::NoReference);
            assert_eq!(r.similarity, NO_COMPARISON);
            assert_eq!(r.region, region());
        }
    }

    #[test]
    fn test_identical_probe_granted() {
        let e = [0.2, -0.4, 0.9, 0.1];
        let snap = snapshot(&[("alice", &e)]);
        let r = CosineMatcher.compare(&emb(&e), region(), &snap, 0.68);
        assert!(r.granted);
        assert_eq!(r.identity(), Some("alice"));
        assert!((r.similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_orthogonal_probe_denied() {
        let snap = snapshot(&[("alice", &[1.0, 0.0, 0.0])]);
        let r = CosineMatcher.compare(&emb(&[0.0, 1.0, 0.0]), region(), &snap, 0.68);
        assert!(!r.granted);
        assert_eq!(r.best_identity, MatchedIdentity::Unrecognized);
        assert!(r.similarity.abs() < 1e-12);
    }

    #[test]
    fn test_best_match_wins_regardless_of_position() {
        let snap = snapshot(&[
            ("decoy1", &[0.0, 1.0, 0.0]),
            ("decoy2", &[0.0, 0.0, 1.0]),
            ("match", &[1.0, 0.1, 0.0]),
        ]);
        let r = CosineMatcher.compare(&emb(&[1.0, 0.0, 0.0]), region(), &snap, 0.5);
        assert!(r.granted);
        assert_eq!(r.identity(), Some("match"));
    }

    #[test]
    fn test_tie_goes_to_first_in_snapshot_order() {
        let snap = snapshot(&[
            ("first", &[1.0, 0.0]),
            ("second", &[2.0, 0.0]),
        ]);
        let r = CosineMatcher.compare(&emb(&[3.0, 0.0]), region(), &snap, 0.5);
        assert_eq!(r.identity(), Some("first"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let snap = snapshot(&[("alice", &[1.0, 0.0])]);
        let r = CosineMatcher.compare(&emb(&[1.0, 0.0]), region(), &snap, 1.0);
        assert!(r.granted);
    }

    #[test]
    fn test_mismatched_records_skipped() {
        let snap = snapshot(&[
            ("legacy", &[1.0, 0.0, 0.0, 0.0]),
            ("alice", &[1.0, 0.0]),
        ]);
        let r = CosineMatcher.compare(&emb(&[1.0, 0.0]), region(), &snap, 0.68);
        assert!(r.granted);
        assert_eq!(r.identity(), Some("alice"));
    }

    #[test]
    fn test_all_records_mismatched_is_no_reference() {
        let snap = snapshot(&[("legacy", &[1.0, 0.0, 0.0])]);
        let r = CosineMatcher.compare(&emb(&[1.0, 0.0]), region(), &snap, 0.68);
        assert!(!r.granted);
        assert_eq!(r.best_identity, MatchedIdentity::NoReference);
        assert_eq!(r.similarity, NO_COMPARISON);
    }

    #[test]
    fn test_non_finite_record_does_not_shadow_match() {
        let snap = snapshot(&[("mallory", &[f64::NAN, 0.0]), ("alice", &[1.0, 0.0])]);
        let r = CosineMatcher.compare(&emb(&[1.0, 0.0]), region(), &snap, 0.68);
        assert!(r.granted);
        assert_eq!(r.identity(), Some("alice"));
        assert!((r.similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_probe_is_no_reference() {
        let snap = snapshot(&[("alice", &[1.0, 0.0])]);
        let r = CosineMatcher.compare(&emb(&[f64::INFINITY, 0.0]), region(), &snap, 0.68);
        assert!(!r.granted);
        assert_eq!(r.best_identity, MatchedIdentity::NoReference);
        assert_eq!(r.similarity, NO_COMPARISON);
    }

    #[test]
    fn test_below_threshold_reports_best_similarity() {
        let snap = snapshot(&[("alice", &[1.0, 1.0]), ("bob", &[1.0, -1.0])]);
        let r = CosineMatcher.compare(&emb(&[1.0, 0.0]), region(), &snap, 0.9);
        assert!(!r.granted);
        assert_eq!(r.best_identity, MatchedIdentity::Unrecognized);
        assert!((r.similarity - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_compare_is_idempotent() {
        let snap = snapshot(&[("alice", &[0.3, 0.7]), ("bob", &[0.9, -0.2])]);
        let probe = emb(&[0.5, 0.5]);
        let first = CosineMatcher.compare(&probe, region(), &snap, 0.68);
        for _ in 0..5 {
            assert_eq!(CosineMatcher.compare(&probe, region(), &snap, 0.68), first);
        }
    }

    #[test]
    fn test_evaluate_batch_preserves_probe_order() {
        let snap = snapshot(&[("alice", &[1.0, 0.0]), ("bob", &[0.0, 1.0])]);
        let probes = vec![
            Probe { embedding: emb(&[0.0, 1.0]), region: BoundingBox { x: 1, ..region() } },
            Probe { embedding: emb(&[1.0, 0.0]), region: BoundingBox { x: 2, ..region() } },
            Probe { embedding: emb(&[-1.0, -1.0]), region: BoundingBox { x: 3, ..region() } },
        ];
        let results = evaluate_batch(&CosineMatcher, &probes, &snap, 0.68);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].identity(), Some("bob"));
        assert_eq!(results[1].identity(), Some("alice"));
        assert!(!results[2].granted);
        let xs: Vec<_> = results.iter().map(|r| r.region.x).collect();
        assert_eq!(xs, [1, 2, 3]);
    }
}
