//! Embedding extraction collaborator and the input policy applied to it.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{Extraction, Probe};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("extraction failed: {0}")]
    Failed(String),
}

/// How hard the extractor should insist on finding a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Only report faces the detector actually found.
    Strict,
    /// Fall back to a whole-frame region when no face is found.
    Relaxed,
}

/// Produces face embeddings from frames of type `F`.
pub trait EmbeddingExtractor<F> {
    fn extract(&mut self, frame: &F, mode: ExtractionMode) -> Result<Vec<Extraction>, ExtractionError>;
}

/// Extract the face to enroll: strict first, then relaxed.
pub fn extract_for_enrollment<F, E>(extractor: &mut E, frame: &F) -> Result<Extraction, ExtractionError>
where
    E: EmbeddingExtractor<F> + ?Sized,
{
    match extractor.extract(frame, ExtractionMode::Strict) {
        Ok(faces) if !faces.is_empty() => return first_face(faces),
        Ok(_) | Err(ExtractionError::NoFaceDetected) => {
            tracing::info!("strict extraction found no face, retrying relaxed");
        }
        Err(err) => return Err(err),
    }
    first_face(extractor.extract(frame, ExtractionMode::Relaxed)?)
}

fn first_face(faces: Vec<Extraction>) -> Result<Extraction, ExtractionError> {
    faces.into_iter().next().ok_or(ExtractionError::NoFaceDetected)
}

/// Drop extractions below the confidence floor.
pub fn filter_confident(extractions: Vec<Extraction>, floor: f64) -> Vec<Probe> {
    let total = extractions.len();
    let probes: Vec<Probe> = extractions
        .into_iter()
        .filter(|e| e.confidence >= floor)
        .map(|e| Probe {
            embedding: e.embedding,
            region: e.region,
        })
        .collect();
    if probes.len() < total {
        tracing::trace!(kept = probes.len(), total, floor, "low-confidence faces dropped");
    }
    probes
}

/// One frame's worth of pre-computed extractions.
///
/// Deserializes from either a list of faces or a single face object, the two
/// shapes DeepFace-style `represent` calls return.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "FrameShape")]
pub struct ExtractionFrame {
    pub faces: Vec<Extraction>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FrameShape {
    Many(Vec<Extraction>),
    One(Extraction),
}

impl From<FrameShape> for ExtractionFrame {
    fn from(shape: FrameShape) -> Self {
        match shape {
            FrameShape::Many(faces) => Self { faces },
            FrameShape::One(face) => Self { faces: vec![face] },
        }
    }
}

/// Extractor over frames whose extractions were computed upstream.
///
/// Strict mode keeps only faces with non-zero confidence; a zero-confidence
/// face is the whole-frame fallback of an extractor run without enforced
/// detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedExtractor;

impl EmbeddingExtractor<ExtractionFrame> for RecordedExtractor {
    fn extract(
        &mut self,
        frame: &ExtractionFrame,
        mode: ExtractionMode,
    ) -> Result<Vec<Extraction>, ExtractionError> {
        match mode {
            ExtractionMode::Relaxed => Ok(frame.faces.clone()),
            ExtractionMode::Strict => {
                let faces: Vec<Extraction> = frame
                    .faces
                    .iter()
                    .filter(|f| f.confidence > 0.0)
                    .cloned()
                    .collect();
                if faces.is_empty() {
                    Err(ExtractionError::NoFaceDetected)
                } else {
                    Ok(faces)
                }
            }
        }
    }
}
