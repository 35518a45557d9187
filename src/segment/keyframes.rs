use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{info, warn};

use crate::error::{Result, SegmentError};
use crate::media::ffmpeg::{FrameSize, MediaToolkit};
use crate::segment::{Keyframe, SceneSegment};
use crate::utils::workspace::{RunId, TempFiles, Workspace};

/// `count` timestamps splitting the segment into `count + 1` equal
/// intervals. The segment's own start and end are never sampled.
pub fn keyframe_timestamps(segment: &SceneSegment, count: usize) -> Vec<f64> {
    let step = segment.duration_sec / (count + 1) as f64;
    (1..=count)
        .map(|k| segment.start_sec + step * k as f64)
        .collect()
}

struct FrameJob {
    segment: usize,
    scene_id: usize,
    index: usize,
    timestamp_sec: f64,
}

pub struct KeyframeExtractor<'a> {
    toolkit: &'a dyn MediaToolkit,
    workspace: &'a Workspace,
    pool: &'a ThreadPool,
    size: FrameSize,
}

impl<'a> KeyframeExtractor<'a> {
    pub fn new(
        toolkit: &'a dyn MediaToolkit,
        workspace: &'a Workspace,
        pool: &'a ThreadPool,
        size: FrameSize,
    ) -> Self {
        Self {
            toolkit,
            workspace,
            pool,
            size,
        }
    }

    /// Fills in `keyframes` for every segment. Frames that fail are logged and
    /// left out; every file written is registered with `temp`.
    pub fn extract(
        &self,
        run: &RunId,
        input: &Path,
        segments: &mut [SceneSegment],
        per_scene: usize,
        temp: &TempFiles,
    ) {
        let jobs: Vec<FrameJob> = segments
            .iter()
            .enumerate()
            .flat_map(|(i, segment)| {
                keyframe_timestamps(segment, per_scene)
                    .into_iter()
                    .enumerate()
                    .map(move |(index, timestamp_sec)| FrameJob {
                        segment: i,
                        scene_id: segment.id,
                        index,
                        timestamp_sec,
                    })
            })
            .collect();

        // Indexed collect keeps (scene, frame) order regardless of which
        // worker finishes first.
        let results: Vec<Option<Keyframe>> = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| match self.extract_one(run, input, job, temp) {
                    Ok(keyframe) => Some(keyframe),
                    Err(e) => {
                        warn!(run = %run, scene = job.scene_id, "Skipping keyframe: {}", e);
                        None
                    }
                })
                .collect()
        });

        let requested = jobs.len();
        let mut extracted = 0;
        for (job, keyframe) in jobs.iter().zip(results) {
            if let Some(keyframe) = keyframe {
                segments[job.segment].keyframes.push(keyframe);
                extracted += 1;
            }
        }
        info!(run = %run, requested, extracted, "Keyframe extraction finished");
    }

    fn extract_one(
        &self,
        run: &RunId,
        input: &Path,
        job: &FrameJob,
        temp: &TempFiles,
    ) -> Result<Keyframe> {
        let fail = |reason: String| SegmentError::FrameExtraction {
            timestamp_sec: job.timestamp_sec,
            reason,
        };

        let path = self.workspace.frame_path(run, job.scene_id, job.index);
        temp.track(&path);

        self.toolkit
            .extract_frame(input, job.timestamp_sec, self.size, &path)
            .map_err(|e| fail(e.to_string()))?;

        let bytes = fs::read(&path).map_err(|e| fail(format!("reading {:?}: {}", path, e)))?;
        if bytes.is_empty() {
            return Err(fail("tool produced an empty image".into()));
        }
        let image = image::load_from_memory(&bytes).map_err(|e| fail(e.to_string()))?;

        Ok(Keyframe {
            index: job.index,
            timestamp_sec: job.timestamp_sec,
            image_data: format!("data:image/jpeg;base64,{}", STANDARD.encode(&bytes)),
            temp_path: path,
            width: image.width(),
            height: image.height(),
        })
    }
}
