use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ingest::fetcher::{HttpFetcher, VideoSource};
use crate::media::audio;
use crate::media::ffmpeg::{FfmpegToolkit, FrameSize, MediaToolkit};
use crate::media::mimetype::{self, Sniffed};
use crate::segment::keyframes::KeyframeExtractor;
use crate::segment::{detector, partition, SceneSegment};
use crate::utils::config::{ConfigUpdate, SegmentationConfig, Settings};
use crate::utils::workspace::{RunId, TempFiles, Workspace};

/// Turns a video URL into scenes with keyframes, and exposes the audio
/// track separately.
///
/// A `Segmenter` is shared between threads; every call is an independent run
/// with its own temp files and its own snapshot of the config.
pub struct Segmenter {
    toolkit: Arc<dyn MediaToolkit>,
    source: Arc<dyn VideoSource>,
    workspace: Workspace,
    config: RwLock<SegmentationConfig>,
    frame_size: FrameSize,
    pool: ThreadPool,
}

impl Segmenter {
    /// Production wiring: ffmpeg/ffprobe subprocesses and HTTP downloads.
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let toolkit = Arc::new(FfmpegToolkit::from_settings(settings));
        let source = Arc::new(HttpFetcher::new(
            &settings.user_agent,
            settings.fetch_timeout,
        )?);
        Self::with_parts(settings, toolkit, source)
    }

    pub fn with_parts(
        settings: &Settings,
        toolkit: Arc<dyn MediaToolkit>,
        source: Arc<dyn VideoSource>,
    ) -> anyhow::Result<Self> {
        settings.segmentation.validate()?;
        let workspace = Workspace::create(&settings.workspace_dir)?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.keyframe_workers)
            .thread_name(|i| format!("keyframe-{i}"))
            .build()
            .context("Failed to build keyframe worker pool")?;

        Ok(Self {
            toolkit,
            source,
            workspace,
            config: RwLock::new(settings.segmentation.clone()),
            frame_size: FrameSize {
                width: settings.frame_width,
                height: settings.frame_height,
            },
            pool,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Snapshot of the live config.
    pub fn config(&self) -> SegmentationConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merges `update` into the live config. Runs already in flight keep the
    /// snapshot they started with. An invalid update changes nothing.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<SegmentationConfig> {
        let mut live = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let merged = live.apply(update)?;
        *live = merged.clone();
        info!(?merged, "Segmentation config updated");
        Ok(merged)
    }

    /// Fetch, probe, detect, partition, extract keyframes. Every temp file
    /// created along the way is gone when this returns, whatever the outcome.
    pub fn segment_video(&self, video_url: &str) -> Result<Vec<SceneSegment>> {
        let config = self.config();
        let run = RunId::new();
        let temp = TempFiles::new();

        info!(run = %run, url = video_url, "Segmenting video");
        let result = self.run_segmentation(&run, video_url, &config, &temp);

        debug!(run = %run, files = temp.len(), "Cleaning up temp files");
        temp.cleanup();

        match &result {
            Ok(segments) => info!(run = %run, scenes = segments.len(), "Segmentation finished"),
            Err(e) => warn!(run = %run, "Segmentation failed: {}", e),
        }
        result
    }

    fn run_segmentation(
        &self,
        run: &RunId,
        video_url: &str,
        config: &SegmentationConfig,
        temp: &TempFiles,
    ) -> Result<Vec<SceneSegment>> {
        let source = self.fetch(run, video_url, temp)?;

        let duration = detector::probe_duration(self.toolkit.as_ref(), &source)?;
        info!(run = %run, duration, "Probed duration");

        let boundaries =
            detector::detect_boundaries(self.toolkit.as_ref(), &source, duration, config);
        let mut segments = partition::partition(&boundaries, duration, config.min_scene_duration);
        info!(
            run = %run,
            boundaries = boundaries.len(),
            scenes = segments.len(),
            "Partitioned scenes"
        );

        KeyframeExtractor::new(
            self.toolkit.as_ref(),
            &self.workspace,
            &self.pool,
            self.frame_size,
        )
        .extract(run, &source, &mut segments, config.keyframes_per_scene, temp);

        Ok(segments)
    }

    /// Mono 16 kHz 16-bit PCM WAV of a local video file.
    pub fn extract_audio_from_video(&self, input: &Path) -> Result<Vec<u8>> {
        audio::extract_audio(self.toolkit.as_ref(), &self.workspace, input)
    }

    /// Downloads `video_url` and returns its audio as in
    /// [`extract_audio_from_video`](Self::extract_audio_from_video).
    pub fn extract_audio_from_url(&self, video_url: &str) -> Result<Vec<u8>> {
        let run = RunId::new();
        let temp = TempFiles::new();

        let source = self.fetch(&run, video_url, &temp)?;
        self.extract_audio_from_video(&source)
    }

    fn fetch(&self, run: &RunId, video_url: &str, temp: &TempFiles) -> Result<PathBuf> {
        let dest = self.workspace.source_path(run);
        temp.track(&dest);

        let bytes = self.source.fetch(video_url, &dest)?;

        match mimetype::sniff_video(&dest) {
            Ok(Sniffed::Other(mime)) => {
                warn!(run = %run, "Downloaded content sniffed as {}, probing anyway", mime)
            }
            Ok(sniffed) => debug!(run = %run, ?sniffed, "Sniffed downloaded content"),
            Err(e) => warn!(run = %run, "Mimetype detection failed: {}", e),
        }
        info!(run = %run, bytes, "Fetched source video");

        Ok(dest)
    }
}
