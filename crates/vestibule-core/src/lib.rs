//! vestibule-core — Member registry and face-embedding matching.
//!
//! Embeddings come from an external face model. This crate keeps the set of
//! enrolled members, matches probe embeddings against it by cosine
//! similarity, and turns per-cycle match results into deduplicated
//! access-granted notifications.

pub mod cycle;
pub mod extractor;
pub mod matcher;
pub mod registry;
pub mod session;
pub mod similarity;
pub mod types;

pub use cycle::{CycleGate, CycleTicket, FrameSampler};
pub use extractor::{EmbeddingExtractor, ExtractionError, ExtractionFrame, ExtractionMode, RecordedExtractor};
pub use matcher::{CosineMatcher, Matcher};
pub use registry::{
    DuplicatePolicy, MemberRegistry, MemberStore, MemoryStore, RegistryError, RegistryOptions,
    RegistrySnapshot, StoreError,
};
pub use session::{MatchPolicy, NotificationSink, RecognitionSession, TracingSink};
pub use similarity::{cosine_similarity, DimensionMismatch};
pub use types::{AccessEvent, BoundingBox, Embedding, Extraction, MatchResult, MatchedIdentity, MemberRecord, Probe};
