//! Extraction feed: one JSON document per line, one line per captured frame.
//!
//! Each line is what an external face model reported for that frame, in the
//! shape of a DeepFace `represent` result (a list of faces, or one face
//! object). Blank lines are ignored.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader, Lines};
use vestibule_core::ExtractionFrame;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("failed to open feed {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("feed read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame on line {line}: {source}")]
    Parse {
        line: u64,
        source: serde_json::Error,
    },
}

impl FeedError {
    /// Whether the feed can keep delivering frames after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FeedError::Parse { .. })
    }
}

/// A frame pulled from the feed.
#[derive(Debug, Clone)]
pub struct FeedFrame {
    /// Line number in the feed.
    pub sequence: u64,
    pub extractions: ExtractionFrame,
}

pub type BoxedReader = BufReader<Box<dyn AsyncRead + Unpin + Send>>;

pub struct FrameFeed<R> {
    lines: Lines<R>,
    line: u64,
}

impl FrameFeed<BoxedReader> {
    /// Open a file, or stdin for `-`.
    pub async fn open(path: &str) -> Result<Self, FeedError> {
        let reader: Box<dyn AsyncRead + Unpin + Send> = if path == "-" {
            Box::new(tokio::io::stdin())
        } else {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|source| FeedError::Open {
                    path: path.to_string(),
                    source,
                })?;
            Box::new(file)
        };
        tracing::info!(path, "extraction feed opened");
        Ok(Self::new(BufReader::new(reader)))
    }
}

impl<R: AsyncBufRead + Unpin> FrameFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// Next frame, or `None` at end of feed.
    pub async fn next_frame(&mut self) -> Result<Option<FeedFrame>, FeedError> {
        loop {
            let Some(raw) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line += 1;
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let extractions = serde_json::from_str(raw).map_err(|source| FeedError::Parse {
                line: self.line,
                source,
            })?;
            return Ok(Some(FeedFrame {
                sequence: self.line,
                extractions,
            }));
        }
    }
}
