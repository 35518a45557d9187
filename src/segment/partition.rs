use crate::segment::SceneSegment;

/// Turns sorted boundaries into gap-free segments of at least
/// `min_scene_duration` seconds (unless the whole video is shorter).
///
/// Short pieces always extend the open segment to the right. A leading run
/// of short pieces stays open and swallows the next long piece instead of
/// being emitted on its own, so `[0,2] [2,2.1] [2.1,9] [9,20]` with a 3 s
/// minimum becomes `[0,9] [9,20]`.
pub fn partition(boundaries: &[f64], duration: f64, min_scene_duration: f64) -> Vec<SceneSegment> {
    let mut merged: Vec<(f64, f64)> = Vec::new();
    let mut open: Option<(f64, f64)> = None;

    for pair in boundaries.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if end <= start {
            continue;
        }
        let short = end - start < min_scene_duration;

        open = Some(match open {
            None => (start, end),
            Some((open_start, _)) if short => (open_start, end),
            Some((open_start, open_end)) if open_end - open_start < min_scene_duration => {
                (open_start, end)
            }
            Some(closed) => {
                merged.push(closed);
                (start, end)
            }
        });
    }
    merged.extend(open);

    if merged.is_empty() {
        merged.push((0.0, duration));
    }

    let mut segments: Vec<SceneSegment> = Vec::with_capacity(merged.len());
    let last = merged.len() - 1;
    for (i, (_, end)) in merged.into_iter().enumerate() {
        let start = segments.last().map_or(0.0, |prev| prev.end_sec);
        let end = if i == last { duration } else { end };
        segments.push(SceneSegment::new(i + 1, start, end));
    }
    segments
}
