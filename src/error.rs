use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single external tool invocation (ffmpeg / ffprobe).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected tool output: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to probe duration of {path:?}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("scene detection failed: {0}")]
    Detection(#[source] ToolError),

    #[error("keyframe at {timestamp_sec:.3}s could not be extracted: {reason}")]
    FrameExtraction { timestamp_sec: f64, reason: String },

    #[error("audio extraction failed: {0}")]
    AudioExtraction(String),

    #[error("invalid segmentation config: {0}")]
    InvalidConfig(String),

    #[error("workspace error at {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SegmentError {
    /// Whether this error aborts a `segment_video` run. Detection and
    /// per-frame failures are absorbed by the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SegmentError::Detection(_) | SegmentError::FrameExtraction { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SegmentError>;
