use std::path::Path;

use tracing::{info, warn};

use crate::error::{Result, SegmentError};
use crate::media::ffmpeg::MediaToolkit;
use crate::utils::config::SegmentationConfig;

/// Upper bound on the number of segments in a fallback partition.
pub const FALLBACK_MAX_SEGMENTS: usize = 8;
/// Nominal fallback segment length in seconds.
pub const FALLBACK_SEGMENT_SECS: f64 = 5.0;

/// Cuts closer together than this (seconds) are the same cut.
const DEDUP_EPSILON: f64 = 1e-3;

pub fn probe_duration(toolkit: &dyn MediaToolkit, input: &Path) -> Result<f64> {
    let duration = toolkit
        .probe_duration(input)
        .map_err(|e| SegmentError::Probe {
            path: input.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(SegmentError::Probe {
            path: input.to_path_buf(),
            reason: format!("invalid duration {duration}"),
        });
    }
    Ok(duration)
}

/// Sorted boundary timestamps starting at 0 and, unless truncated by
/// `max_scenes_per_video`, ending at `duration`.
///
/// Never fails: if scene detection errors, the boundaries of a uniform
/// partition are returned instead.
pub fn detect_boundaries(
    toolkit: &dyn MediaToolkit,
    input: &Path,
    duration: f64,
    config: &SegmentationConfig,
) -> Vec<f64> {
    let cuts = match toolkit.detect_scene_changes(input, config.scene_threshold) {
        Ok(cuts) => {
            info!(
                candidates = cuts.len(),
                threshold = config.scene_threshold,
                "Scene detection finished"
            );
            cuts
        }
        Err(e) => {
            let err = SegmentError::Detection(e);
            warn!("{}; falling back to uniform partition", err);
            uniform_cuts(duration, config)
        }
    };

    boundaries_from_cuts(&cuts, duration, config.max_scenes_per_video)
}

/// Seeds with 0, appends `duration`, drops out-of-range candidates,
/// deduplicates, sorts, and keeps at most `max_scenes + 1` boundaries.
pub fn boundaries_from_cuts(cuts: &[f64], duration: f64, max_scenes: usize) -> Vec<f64> {
    let mut boundaries = Vec::with_capacity(cuts.len() + 2);
    boundaries.push(0.0);
    boundaries.extend(
        cuts.iter()
            .copied()
            .filter(|t| t.is_finite() && *t > 0.0 && *t < duration),
    );
    boundaries.push(duration);

    boundaries.sort_by(f64::total_cmp);
    boundaries.dedup_by(|later, earlier| (*later - *earlier).abs() < DEDUP_EPSILON);
    boundaries.truncate(max_scenes.max(1) + 1);
    boundaries
}

/// Interior cut points of the fallback partition, see
/// [`fallback_segment_count`].
pub fn uniform_cuts(duration: f64, config: &SegmentationConfig) -> Vec<f64> {
    let count = fallback_segment_count(duration, config);
    let step = duration / count as f64;
    (1..count).map(|i| step * i as f64).collect()
}

/// `min(8, ceil(D / 5))` segments, lowered so that the segments stay equal
/// length under `max_scenes_per_video` and `min_scene_duration`.
pub fn fallback_segment_count(duration: f64, config: &SegmentationConfig) -> usize {
    let by_length = (duration / FALLBACK_SEGMENT_SECS).ceil() as usize;
    let by_minimum = (duration / config.min_scene_duration).floor() as usize;
    by_length
        .min(FALLBACK_MAX_SEGMENTS)
        .min(config.max_scenes_per_video)
        .min(by_minimum)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::partition::partition;

    #[test]
    fn test_boundaries_seeded_sorted_deduplicated() {
        let cuts = [9.0, 2.1, 2.0, 2.0004, 9.0, -1.0, 25.0, f64::NAN];
        assert_eq!(
            boundaries_from_cuts(&cuts, 20.0, 20),
            vec![0.0, 2.0, 2.1, 9.0, 20.0]
        );
    }

    #[test]
    fn test_boundaries_truncated_to_cap() {
        let cuts: Vec<f64> = (1..30).map(|i| i as f64).collect();
        let boundaries = boundaries_from_cuts(&cuts, 30.0, 4);
        assert_eq!(boundaries, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_no_cuts_spans_whole_video() {
        assert_eq!(boundaries_from_cuts(&[], 12.5, 20), vec![0.0, 12.5]);
    }

    fn config(max_scenes: usize, min_scene: f64) -> SegmentationConfig {
        SegmentationConfig {
            max_scenes_per_video: max_scenes,
            min_scene_duration: min_scene,
            ..SegmentationConfig::default()
        }
    }

    fn fallback_durations(duration: f64, config: &SegmentationConfig) -> Vec<f64> {
        let boundaries = boundaries_from_cuts(
            &uniform_cuts(duration, config),
            duration,
            config.max_scenes_per_video,
        );
        partition(&boundaries, duration, config.min_scene_duration)
            .iter()
            .map(|s| s.duration_sec)
            .collect()
    }

    #[test]
    fn test_fallback_count() {
        let defaults = SegmentationConfig::default();
        assert_eq!(fallback_segment_count(37.0, &defaults), 8);
        assert_eq!(fallback_segment_count(12.0, &defaults), 3);
        assert_eq!(fallback_segment_count(5.0, &defaults), 1);
        assert_eq!(fallback_segment_count(0.4, &defaults), 1);
        assert_eq!(fallback_segment_count(3600.0, &defaults), 8);
    }

    #[test]
    fn test_fallback_count_respects_cap_and_minimum() {
        assert_eq!(fallback_segment_count(37.0, &config(3, 2.0)), 3);
        assert_eq!(fallback_segment_count(37.0, &config(20, 10.0)), 3);
        assert_eq!(fallback_segment_count(37.0, &config(1, 2.0)), 1);
        assert_eq!(fallback_segment_count(4.0, &config(20, 10.0)), 1);
    }

    #[test]
    fn test_uniform_cuts_are_equal_length() {
        let durations = fallback_durations(37.0, &SegmentationConfig::default());
        assert_eq!(durations.len(), 8);
        for d in durations {
            assert!((d - 4.625).abs() < 1e-9);
        }
    }

    #[test]
    fn test_uniform_cuts_stay_equal_under_cap() {
        let durations = fallback_durations(37.0, &config(3, 2.0));
        assert_eq!(durations.len(), 3);
        for d in durations {
            assert!((d - 37.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_uniform_cuts_stay_equal_above_minimum() {
        let durations = fallback_durations(37.0, &config(20, 10.0));
        assert_eq!(durations.len(), 3);
        for d in durations {
            assert!((d - 37.0 / 3.0).abs() < 1e-9);
            assert!(d >= 10.0);
        }
    }
}
