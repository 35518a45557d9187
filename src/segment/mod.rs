pub mod detector;
pub mod keyframes;
pub mod partition;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A still image taken from inside a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Position within the scene's requested frames, starting at 0.
    pub index: usize,
    pub timestamp_sec: f64,
    /// `data:image/jpeg;base64,...`
    pub image_data: String,
    /// Workspace file the frame was written to. Deleted once the run ends.
    pub temp_path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// One contiguous analysis unit of the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSegment {
    /// 1-based, contiguous, assigned after partitioning.
    pub id: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    pub duration_sec: f64,
    pub keyframes: Vec<Keyframe>,
}

impl SceneSegment {
    pub fn new(id: usize, start_sec: f64, end_sec: f64) -> Self {
        Self {
            id,
            start_sec,
            end_sec,
            duration_sec: end_sec - start_sec,
            keyframes: Vec::new(),
        }
    }
}
