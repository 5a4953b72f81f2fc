use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::similarity::{cosine_similarity, DimensionMismatch};

/// Face region in source-frame pixel coordinates.
///
/// Field names on the wire follow the `facial_area` object emitted by
/// DeepFace-style extractors (`x`, `y`, `w`, `h`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
}

/// Face embedding vector. Dimensionality is fixed by the extractor model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// No NaN or infinite components.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> Result<f64, DimensionMismatch> {
        cosine_similarity(&self.values, &other.values)
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// One face reported by the external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub embedding: Embedding,
    #[serde(rename = "facial_area")]
    pub region: BoundingBox,
    /// Detector confidence. Extractors run without enforced detection report
    /// 0.0 for the whole-frame fallback region.
    #[serde(rename = "face_confidence", default)]
    pub confidence: f64,
}

/// An extraction that passed the confidence floor and will be matched.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub embedding: Embedding,
    pub region: BoundingBox,
}

/// An enrolled identity and its reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: Uuid,
    pub identity: String,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

impl MemberRecord {
    pub fn new(identity: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            embedding,
            enrolled_at: Utc::now(),
        }
    }
}

/// Who a probe was attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "identity", rename_all = "snake_case")]
pub enum MatchedIdentity {
    /// Best similarity met the threshold.
    Member(String),
    /// Compared against the registry, but no record met the threshold.
    Unrecognized,
    /// No comparison was possible (empty or fully incompatible registry).
    NoReference,
}

/// Decision for one probe. Transient — never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub region: BoundingBox,
    pub best_identity: MatchedIdentity,
    /// Best cosine similarity, or -1.0 when no comparison was possible.
    pub similarity: f64,
    pub granted: bool,
}

impl MatchResult {
    pub fn identity(&self) -> Option<&str> {
        match &self.best_identity {
            MatchedIdentity::Member(name) => Some(name),
            _ => None,
        }
    }
}

/// Emitted once per Unseen → Granted transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessEvent {
    pub timestamp: DateTime<Utc>,
    pub identity: String,
    pub similarity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_parses_deepface_shape() {
        let json = r#"{
            "embedding": [0.1, 0.2, 0.3],
            "facial_area": {"x": 10, "y": 20, "w": 64, "h": 72, "left_eye": null},
            "face_confidence": 0.93
        }"#;
        let ex: Extraction = serde_json::from_str(json).unwrap();
        assert_eq!(ex.embedding.dim(), 3);
        assert_eq!(ex.region, BoundingBox { x: 10, y: 20, width: 64, height: 72 });
        assert!((ex.confidence - 0.93).abs() < 1e-12);
    }

    #[test]
    fn test_extraction_missing_confidence_defaults_to_zero() {
        let json = r#"{"embedding": [1.0], "facial_area": {"x": 0, "y": 0, "w": 1, "h": 1}}"#;
        let ex: Extraction = serde_json::from_str(json).unwrap();
        assert_eq!(ex.confidence, 0.0);
    }

    #[test]
    fn test_embedding_serializes_as_bare_array() {
        let e = Embedding::new(vec![1.0, -2.5]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[1.0,-2.5]");
    }

    #[test]
    fn test_embedding_is_finite() {
        assert!(Embedding::new(vec![0.0, -3.5]).is_finite());
        assert!(!Embedding::new(vec![f64::NAN, 0.0]).is_finite());
        assert!(!Embedding::new(vec![1.0, f64::NEG_INFINITY]).is_finite());
    }

    #[test]
    fn test_match_result_identity_only_for_members() {
        let mut r = MatchResult {
            region: BoundingBox::default(),
            best_identity: MatchedIdentity::Member("alice".into()),
            similarity: 0.9,
            granted: true,
        };
        assert_eq!(r.identity(), Some("alice"));
        r.best_identity = MatchedIdentity::Unrecognized;
        assert_eq!(r.identity(), None);
    }
}
