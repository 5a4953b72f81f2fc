use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use vestibule_core::extractor::{extract_for_enrollment, filter_confident};
use vestibule_core::session::evaluate;
use vestibule_core::{
    EmbeddingExtractor, Extraction, ExtractionError, ExtractionFrame, ExtractionMode, MatchPolicy,
    MatchResult, RegistrySnapshot,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent to the engine thread.
enum EngineRequest {
    Recognize {
        frame: ExtractionFrame,
        snapshot: RegistrySnapshot,
        policy: MatchPolicy,
        reply: oneshot::Sender<Result<Vec<MatchResult>, EngineError>>,
    },
    Enroll {
        frame: ExtractionFrame,
        reply: oneshot::Sender<Result<Extraction, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Extract faces from `frame` and match them against `snapshot`.
    pub async fn recognize(
        &self,
        frame: ExtractionFrame,
        snapshot: RegistrySnapshot,
        policy: MatchPolicy,
    ) -> Result<Vec<MatchResult>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                frame,
                snapshot,
                policy,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Pick the face to enroll from `frame`, strict detection first.
    pub async fn enroll(&self, frame: ExtractionFrame) -> Result<Extraction, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Extraction can block for hundreds of milliseconds with a real model, so
/// it never runs on the async runtime. The request channel holds a single
/// slot; the monitor never has more than one recognition cycle outstanding.
pub fn spawn_engine<E>(mut extractor: E) -> Result<EngineHandle, EngineError>
where
    E: EmbeddingExtractor<ExtractionFrame> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(1);

    std::thread::Builder::new()
        .name("vestibule-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize {
                        frame,
                        snapshot,
                        policy,
                        reply,
                    } => {
                        let result = run_recognize(&mut extractor, &frame, &snapshot, &policy);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { frame, reply } => {
                        let result = extract_for_enrollment(&mut extractor, &frame).map_err(Into::into);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Relaxed extraction, confidence floor, then one match per probe.
/// A frame without faces yields an empty batch, not an error.
fn run_recognize<E>(
    extractor: &mut E,
    frame: &ExtractionFrame,
    snapshot: &RegistrySnapshot,
    policy: &MatchPolicy,
) -> Result<Vec<MatchResult>, EngineError>
where
    E: EmbeddingExtractor<ExtractionFrame>,
{
    let extractions = match extractor.extract(frame, ExtractionMode::Relaxed) {
        Ok(faces) => faces,
        Err(ExtractionError::NoFaceDetected) => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    let faces = extractions.len();
    let probes = filter_confident(extractions, policy.min_face_confidence);
    let results = evaluate(&probes, snapshot, policy);

    tracing::debug!(
        faces,
        probes = probes.len(),
        granted = results.iter().filter(|r| r.granted).count(),
        members = snapshot.len(),
        "recognize: cycle complete"
    );
    Ok(results)
}
