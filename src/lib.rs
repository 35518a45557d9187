//! Video pre-processing for downstream analysis: splits a remote video into
//! gap-free scenes with representative keyframes, and extracts its audio in
//! a transcription-ready format.

pub mod error;
pub mod ingest;
pub mod media;
pub mod pipeline;
pub mod segment;
pub mod utils;

pub use error::{Result, SegmentError, ToolError};
pub use ingest::fetcher::{HttpFetcher, VideoSource};
pub use media::ffmpeg::{FfmpegToolkit, FrameSize, MediaToolkit};
pub use pipeline::Segmenter;
pub use segment::{Keyframe, SceneSegment};
pub use utils::config::{ConfigUpdate, SegmentationConfig, Settings};
pub use utils::workspace::Workspace;
