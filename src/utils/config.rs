use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SegmentError;

const ENV_PREFIX: &str = "SEGMENTER_";

/// Tunables read by every `segment_video` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Scene-change score a frame must exceed to count as a cut, in (0, 1].
    pub scene_threshold: f64,
    /// Segments shorter than this (seconds) are merged into a neighbour.
    pub min_scene_duration: f64,
    pub max_scenes_per_video: usize,
    pub keyframes_per_scene: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            scene_threshold: 0.3,
            min_scene_duration: 2.0,
            max_scenes_per_video: 20,
            keyframes_per_scene: 3,
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub scene_threshold: Option<f64>,
    pub min_scene_duration: Option<f64>,
    pub max_scenes_per_video: Option<usize>,
    pub keyframes_per_scene: Option<usize>,
}

impl SegmentationConfig {
    /// Returns a copy with `update` merged in, or an error if the merged
    /// values are out of range. `self` is never modified.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<Self, SegmentError> {
        let merged = Self {
            scene_threshold: update.scene_threshold.unwrap_or(self.scene_threshold),
            min_scene_duration: update.min_scene_duration.unwrap_or(self.min_scene_duration),
            max_scenes_per_video: update
                .max_scenes_per_video
                .unwrap_or(self.max_scenes_per_video),
            keyframes_per_scene: update
                .keyframes_per_scene
                .unwrap_or(self.keyframes_per_scene),
        };
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> Result<(), SegmentError> {
        if !(self.scene_threshold > 0.0 && self.scene_threshold <= 1.0) {
            return Err(SegmentError::InvalidConfig(format!(
                "scene_threshold must be in (0, 1], got {}",
                self.scene_threshold
            )));
        }
        if !(self.min_scene_duration.is_finite() && self.min_scene_duration > 0.0) {
            return Err(SegmentError::InvalidConfig(format!(
                "min_scene_duration must be a positive number of seconds, got {}",
                self.min_scene_duration
            )));
        }
        if self.max_scenes_per_video == 0 {
            return Err(SegmentError::InvalidConfig(
                "max_scenes_per_video must be at least 1".into(),
            ));
        }
        if self.keyframes_per_scene == 0 {
            return Err(SegmentError::InvalidConfig(
                "keyframes_per_scene must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Process-level settings: tool locations, timeouts, workspace.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub user_agent: String,
    pub fetch_timeout: Duration,
    pub probe_timeout: Duration,
    pub detect_timeout: Duration,
    pub frame_timeout: Duration,
    pub audio_timeout: Duration,
    pub frame_width: u32,
    pub frame_height: u32,
    pub keyframe_workers: usize,
    pub segmentation: SegmentationConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_dir: std::env::temp_dir().join("scene-segmenter"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            fetch_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(30),
            detect_timeout: Duration::from_secs(600),
            frame_timeout: Duration::from_secs(30),
            audio_timeout: Duration::from_secs(300),
            frame_width: 1280,
            frame_height: 720,
            keyframe_workers: 4,
            segmentation: SegmentationConfig::default(),
        }
    }
}

impl Settings {
    /// Main entry point to get settings.
    /// Reads the `.env`-style file first (if it exists), then lets
    /// `SEGMENTER_*` process environment variables override it.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        let mut values = HashMap::new();

        if let Some(path) = env_file {
            if path.exists() {
                values.extend(load_from_env(path)?);
                info!("Loaded settings from {:?}", path);
            }
        }
        for (key, value) in std::env::vars() {
            if key.starts_with(ENV_PREFIX) {
                values.insert(key, value);
            }
        }

        Self::from_values(&values)
    }

    fn from_values(values: &HashMap<String, String>) -> Result<Self> {
        let mut settings = Self::default();

        for (key, value) in values {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match name {
                "WORKSPACE_DIR" => settings.workspace_dir = PathBuf::from(value),
                "FFMPEG_PATH" => settings.ffmpeg_path = PathBuf::from(value),
                "FFPROBE_PATH" => settings.ffprobe_path = PathBuf::from(value),
                "USER_AGENT" => settings.user_agent = value.to_string(),
                "FETCH_TIMEOUT_SECS" => settings.fetch_timeout = parse_secs(key, value)?,
                "PROBE_TIMEOUT_SECS" => settings.probe_timeout = parse_secs(key, value)?,
                "DETECT_TIMEOUT_SECS" => settings.detect_timeout = parse_secs(key, value)?,
                "FRAME_TIMEOUT_SECS" => settings.frame_timeout = parse_secs(key, value)?,
                "AUDIO_TIMEOUT_SECS" => settings.audio_timeout = parse_secs(key, value)?,
                "FRAME_WIDTH" => settings.frame_width = parse_value(key, value)?,
                "FRAME_HEIGHT" => settings.frame_height = parse_value(key, value)?,
                "KEYFRAME_WORKERS" => settings.keyframe_workers = parse_value(key, value)?,
                "SCENE_THRESHOLD" => {
                    settings.segmentation.scene_threshold = parse_value(key, value)?
                }
                "MIN_SCENE_DURATION" => {
                    settings.segmentation.min_scene_duration = parse_value(key, value)?
                }
                "MAX_SCENES_PER_VIDEO" => {
                    settings.segmentation.max_scenes_per_video = parse_value(key, value)?
                }
                "KEYFRAMES_PER_SCENE" => {
                    settings.segmentation.keyframes_per_scene = parse_value(key, value)?
                }
                _ => {}
            }
        }

        if settings.keyframe_workers == 0 {
            return Err(anyhow!("{ENV_PREFIX}KEYFRAME_WORKERS must be at least 1"));
        }
        if settings.frame_width == 0 || settings.frame_height == 0 {
            return Err(anyhow!("Frame dimensions must be non-zero"));
        }
        settings.segmentation.validate()?;

        Ok(settings)
    }
}

fn load_from_env(path: &Path) -> Result<HashMap<String, String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let mut values = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Ok(values)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {key}: {value:?}"))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: u64 = parse_value(key, value)?;
    if secs == 0 {
        return Err(anyhow!("{key} must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_env_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".env");
        fs::write(
            &path,
            "# scratch settings\n\
             SEGMENTER_WORKSPACE_DIR=/tmp/segmenter-test\n\
             SEGMENTER_FRAME_TIMEOUT_SECS=12\n\
             SEGMENTER_SCENE_THRESHOLD=0.45\n\
             SEGMENTER_KEYFRAMES_PER_SCENE = 5\n\
             UNRELATED=1\n",
        )?;

        let values = load_from_env(&path)?;
        assert_eq!(values.len(), 5);

        let settings = Settings::from_values(&values)?;
        assert_eq!(settings.workspace_dir, PathBuf::from("/tmp/segmenter-test"));
        assert_eq!(settings.frame_timeout, Duration::from_secs(12));
        assert_eq!(settings.segmentation.scene_threshold, 0.45);
        assert_eq!(settings.segmentation.keyframes_per_scene, 5);
        assert_eq!(settings.probe_timeout, Duration::from_secs(30));

        Ok(())
    }

    #[test]
    fn test_malformed_value_names_key() {
        let mut values = HashMap::new();
        values.insert("SEGMENTER_FRAME_WIDTH".to_string(), "wide".to_string());

        let err = Settings::from_values(&values).unwrap_err();
        assert!(err.to_string().contains("SEGMENTER_FRAME_WIDTH"));
    }

    #[test]
    fn test_out_of_range_segmentation_rejected() {
        let mut values = HashMap::new();
        values.insert("SEGMENTER_SCENE_THRESHOLD".to_string(), "1.5".to_string());
        assert!(Settings::from_values(&values).is_err());
    }

    #[test]
    fn test_apply_merges_only_given_fields() {
        let base = SegmentationConfig::default();
        let update = ConfigUpdate {
            min_scene_duration: Some(4.0),
            ..Default::default()
        };

        let merged = base.apply(&update).unwrap();
        assert_eq!(merged.min_scene_duration, 4.0);
        assert_eq!(merged.scene_threshold, base.scene_threshold);
        assert_eq!(merged.max_scenes_per_video, base.max_scenes_per_video);
    }

    #[test]
    fn test_apply_rejects_invalid_ranges() {
        let base = SegmentationConfig::default();
        let bad = [
            ConfigUpdate {
                scene_threshold: Some(0.0),
                ..Default::default()
            },
            ConfigUpdate {
                min_scene_duration: Some(-1.0),
                ..Default::default()
            },
            ConfigUpdate {
                max_scenes_per_video: Some(0),
                ..Default::default()
            },
            ConfigUpdate {
                keyframes_per_scene: Some(0),
                ..Default::default()
            },
        ];
        for update in &bad {
            assert!(matches!(
                base.apply(update),
                Err(SegmentError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_partial_update_from_json() {
        let update: ConfigUpdate = serde_json::from_str(r#"{"max_scenes_per_video": 6}"#).unwrap();
        assert_eq!(update.max_scenes_per_video, Some(6));
        assert_eq!(update.scene_threshold, None);
    }
}
