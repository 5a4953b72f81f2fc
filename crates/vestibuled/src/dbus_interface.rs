use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use vestibule_core::{Embedding, ExtractionFrame, MemberRecord, MemberRegistry, RegistryError};
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};
use crate::events::EventLog;
use crate::monitor::MonitorStats;

/// D-Bus interface for the Vestibule access-control daemon.
///
/// Bus name: org.freedesktop.Vestibule1
/// Object path: /org/freedesktop/Vestibule1
pub struct VestibuleService {
    pub registry: Arc<MemberRegistry>,
    pub engine: EngineHandle,
    pub events: Arc<EventLog>,
    pub stats: Arc<MonitorStats>,
    pub control: watch::Sender<bool>,
    pub threshold: f64,
    pub embedding_model: String,
}

#[derive(Serialize)]
struct MemberSummary<'a> {
    id: String,
    identity: &'a str,
    enrolled_at: String,
    dim: usize,
}

impl<'a> From<&'a MemberRecord> for MemberSummary<'a> {
    fn from(r: &'a MemberRecord) -> Self {
        Self {
            id: r.id.to_string(),
            identity: &r.identity,
            enrolled_at: r.enrolled_at.to_rfc3339(),
            dim: r.embedding.dim(),
        }
    }
}

#[interface(name = "org.freedesktop.Vestibule1")]
impl VestibuleService {
    /// Enroll `identity` from one frame of extractor output (JSON list of
    /// faces or a single face). Strict detection is tried before relaxed.
    async fn enroll(&self, identity: &str, extraction: &str) -> zbus::fdo::Result<String> {
        tracing::info!(identity, "enroll requested");
        let frame: ExtractionFrame = serde_json::from_str(extraction)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("malformed extraction: {e}")))?;
        let face = self.engine.enroll(frame).await.map_err(engine_error)?;
        self.enroll_blocking(identity, face.embedding).await
    }

    /// Enroll `identity` from a bare embedding vector.
    async fn enroll_embedding(&self, identity: &str, embedding: Vec<f64>) -> zbus::fdo::Result<String> {
        tracing::info!(identity, dim = embedding.len(), "enroll_embedding requested");
        self.enroll_blocking(identity, Embedding::new(embedding)).await
    }

    /// Remove every record for `identity`. Returns the number removed.
    async fn remove(&self, identity: &str) -> zbus::fdo::Result<u32> {
        tracing::info!(identity, "remove requested");
        let registry = self.registry.clone();
        let identity = identity.to_string();
        let removed = tokio::task::spawn_blocking(move || registry.remove(&identity))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("remove task failed: {e}")))?
            .map_err(registry_error)?;
        Ok(removed as u32)
    }

    /// List enrolled members as JSON, in enrollment order.
    async fn list_members(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.registry.snapshot();
        let members: Vec<MemberSummary> = snapshot.iter().map(MemberSummary::from).collect();
        serde_json::to_string(&members).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Re-read the member database. Returns the member count.
    async fn reload(&self) -> zbus::fdo::Result<u32> {
        let registry = self.registry.clone();
        let count = tokio::task::spawn_blocking(move || registry.reload())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("reload task failed: {e}")))?
            .map_err(registry_error)?;
        self.events.note(&format!("Loaded {count} members."));
        Ok(count as u32)
    }

    /// Begin monitoring the extraction feed.
    async fn start(&self) -> zbus::fdo::Result<()> {
        self.control.send_replace(true);
        Ok(())
    }

    /// Stop monitoring. A cycle in flight is discarded when it completes.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        self.control.send_replace(false);
        Ok(())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let stats = self.stats.snapshot();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "running": stats.running,
            "members": self.registry.len(),
            "threshold": self.threshold,
            "embedding_model": self.embedding_model,
            "embedding_dim": self.registry.options().expected_dim,
            "frames_seen": stats.frames_seen,
            "cycles_run": stats.cycles_run,
            "cycles_skipped": stats.cycles_skipped,
            "stale_discarded": stats.stale_discarded,
            "last_granted": stats.last_granted,
        })
        .to_string())
    }

    /// Recent access grants and diagnostics as JSON, newest first.
    async fn recent_events(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.events.recent())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

impl VestibuleService {
    async fn enroll_blocking(&self, identity: &str, embedding: Embedding) -> zbus::fdo::Result<String> {
        let registry = self.registry.clone();
        let identity = identity.to_string();
        let record = tokio::task::spawn_blocking(move || registry.enroll(&identity, embedding))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("enroll task failed: {e}")))?
            .map_err(registry_error)?;
        self.events
            .note(&format!("Member {} registered successfully.", record.identity));
        Ok(record.id.to_string())
    }
}

/// A store outage is a daemon failure, never a rejected request.
fn registry_error(err: RegistryError) -> zbus::fdo::Error {
    match &err {
        RegistryError::Unavailable(_) => {
            tracing::error!(error = %err, "member registry unavailable");
            zbus::fdo::Error::Failed(err.to_string())
        }
        RegistryError::DimensionMismatch(_)
        | RegistryError::InvalidIdentity
        | RegistryError::NonFiniteEmbedding => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
    }
}

fn engine_error(err: EngineError) -> zbus::fdo::Error {
    match &err {
        EngineError::Extraction(vestibule_core::ExtractionError::NoFaceDetected) => {
            zbus::fdo::Error::InvalidArgs("no face could be extracted from the frame".into())
        }
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}
