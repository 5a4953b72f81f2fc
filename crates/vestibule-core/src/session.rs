//! Recognition session: per-cycle matching and grant deduplication.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::matcher::{evaluate_batch, CosineMatcher};
use crate::registry::{MemberRegistry, RegistrySnapshot};
use crate::types::{AccessEvent, MatchResult, Probe};

/// Default cosine similarity needed to grant access.
pub const DEFAULT_THRESHOLD: f64 = 0.68;
/// Default detector confidence below which an extraction is ignored.
pub const DEFAULT_MIN_FACE_CONFIDENCE: f64 = 0.6;

#[derive(Error, Debug, PartialEq)]
pub enum PolicyError {
    #[error("threshold must be within [0, 1], got {0}")]
    Threshold(f64),
    #[error("minimum face confidence must be within [0, 1], got {0}")]
    MinFaceConfidence(f64),
}

/// Decision parameters shared by every probe in a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub threshold: f64,
    pub min_face_confidence: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_face_confidence: DEFAULT_MIN_FACE_CONFIDENCE,
        }
    }
}

impl MatchPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PolicyError::Threshold(self.threshold));
        }
        if !(0.0..=1.0).contains(&self.min_face_confidence) {
            return Err(PolicyError::MinFaceConfidence(self.min_face_confidence));
        }
        Ok(())
    }
}

/// Receives access decisions and diagnostics.
pub trait NotificationSink: Send + Sync {
    /// Called once per Unseen → Granted transition.
    fn access_granted(&self, event: &AccessEvent);
    fn diagnostic(&self, message: &str);
}

/// Sink that only writes to the log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn access_granted(&self, event: &AccessEvent) {
        tracing::info!(
            identity = %event.identity,
            similarity = event.similarity,
            at = %event.timestamp,
            "access granted"
        );
    }

    fn diagnostic(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// Sequences match cycles over time.
///
/// Each identity is either Unseen or Granted. An identity becomes Granted on
/// the first cycle in which one of its probes is granted, which is the only
/// transition that notifies. It returns to Unseen on the first cycle in which
/// it is not granted.
pub struct RecognitionSession {
    registry: Arc<MemberRegistry>,
    matcher: CosineMatcher,
    policy: MatchPolicy,
    granted: HashSet<String>,
    sink: Arc<dyn NotificationSink>,
}

impl RecognitionSession {
    pub fn new(
        registry: Arc<MemberRegistry>,
        policy: MatchPolicy,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self {
            registry,
            matcher: CosineMatcher,
            policy,
            granted: HashSet::new(),
            sink,
        })
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<MemberRegistry> {
        &self.registry
    }

    /// Run one cycle: snapshot the registry, match every probe, then apply.
    pub fn process_batch(&mut self, probes: &[Probe]) -> Vec<MatchResult> {
        let snapshot = self.registry.snapshot();
        let results = evaluate_batch(&self.matcher, probes, &snapshot, self.policy.threshold);
        self.apply(&results);
        results
    }

    /// Advance identity state with one cycle's results.
    ///
    /// Used directly when matching ran elsewhere (e.g. on a worker thread).
    pub fn apply(&mut self, results: &[MatchResult]) -> Vec<AccessEvent> {
        let mut current: HashSet<String> = HashSet::new();
        let mut events = Vec::new();

        for result in results.iter().filter(|r| r.granted) {
            let Some(identity) = result.identity() else {
                continue;
            };
            if !current.insert(identity.to_string()) || self.granted.contains(identity) {
                continue;
            }
            let event = AccessEvent {
                timestamp: Utc::now(),
                identity: identity.to_string(),
                similarity: result.similarity,
            };
            self.sink.access_granted(&event);
            events.push(event);
        }

        let departed = self.granted.difference(&current).count();
        if departed > 0 {
            tracing::debug!(departed, "granted identities left the frame");
        }
        self.granted = current;
        events
    }

    /// Forget every Granted identity.
    pub fn reset(&mut self) {
        self.granted.clear();
    }

    pub fn is_granted(&self, identity: &str) -> bool {
        self.granted.contains(identity)
    }

    pub fn diagnostic(&self, message: &str) {
        self.sink.diagnostic(message);
    }
}

/// Match a probe batch with the default matcher, for callers that hold only
/// a snapshot.
pub fn evaluate(probes: &[Probe], snapshot: &RegistrySnapshot, policy: &MatchPolicy) -> Vec<MatchResult> {
    evaluate_batch(&CosineMatcher, probes, snapshot, policy.threshold)
}
