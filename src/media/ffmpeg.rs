use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Sender};
use serde::Deserialize;
use tracing::debug;

use crate::error::ToolError;
use crate::media::audio;
use crate::utils::config::Settings;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_TAIL: usize = 600;

/// Output resolution for extracted keyframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// The four media capabilities the pipeline needs. Implemented by
/// [`FfmpegToolkit`] in production and by fakes in tests.
pub trait MediaToolkit: Send + Sync {
    /// Total duration of the file in seconds.
    fn probe_duration(&self, input: &Path) -> Result<f64, ToolError>;

    /// Presentation timestamps (seconds) of frames whose scene-change
    /// score exceeds `threshold`. Order and uniqueness are not guaranteed.
    fn detect_scene_changes(&self, input: &Path, threshold: f64) -> Result<Vec<f64>, ToolError>;

    /// Writes the single frame at `at_sec`, scaled to `size`, as a JPEG.
    fn extract_frame(
        &self,
        input: &Path,
        at_sec: f64,
        size: FrameSize,
        output: &Path,
    ) -> Result<(), ToolError>;

    /// Writes the audio track as mono 16 kHz 16-bit PCM WAV.
    fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), ToolError>;
}

#[derive(Debug, Clone)]
pub struct ToolTimeouts {
    pub probe: Duration,
    pub detect: Duration,
    pub frame: Duration,
    pub audio: Duration,
}

pub struct FfmpegToolkit {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    timeouts: ToolTimeouts,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf, timeouts: ToolTimeouts) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            timeouts,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.ffmpeg_path.clone(),
            settings.ffprobe_path.clone(),
            ToolTimeouts {
                probe: settings.probe_timeout,
                detect: settings.detect_timeout,
                frame: settings.frame_timeout,
                audio: settings.audio_timeout,
            },
        )
    }

    fn ffmpeg(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-nostats", "-loglevel", "error"]);
        cmd
    }
}

impl MediaToolkit for FfmpegToolkit {
    fn probe_duration(&self, input: &Path) -> Result<f64, ToolError> {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(input);

        let output = checked(run_with_timeout(cmd, self.timeouts.probe)?, "ffprobe")?;
        parse_probe_duration(&output.stdout)
    }

    fn detect_scene_changes(&self, input: &Path, threshold: f64) -> Result<Vec<f64>, ToolError> {
        // metadata=print:file=- writes one "frame:N pts:P pts_time:S" block per
        // selected frame to stdout, independent of the log level.
        let filter = format!("select='gt(scene,{threshold:.4})',metadata=print:file=-");

        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(input)
            .args(["-map", "0:v:0", "-vf", &filter, "-an", "-f", "null", "-"]);

        let output = checked(run_with_timeout(cmd, self.timeouts.detect)?, "ffmpeg")?;
        Ok(parse_scene_metadata(
            &String::from_utf8_lossy(&output.stdout),
            threshold,
        ))
    }

    fn extract_frame(
        &self,
        input: &Path,
        at_sec: f64,
        size: FrameSize,
        output: &Path,
    ) -> Result<(), ToolError> {
        let mut cmd = self.ffmpeg();
        cmd.args(["-ss", &format!("{at_sec:.3}"), "-i"])
            .arg(input)
            .args([
                "-frames:v",
                "1",
                "-vf",
                &format!("scale={}:{}", size.width, size.height),
                "-q:v",
                "2",
                "-y",
            ])
            .arg(output);

        checked(run_with_timeout(cmd, self.timeouts.frame)?, "ffmpeg")?;
        Ok(())
    }

    fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(input)
            .args([
                "-vn",
                "-acodec",
                "pcm_s16le",
                "-ar",
                &audio::SAMPLE_RATE.to_string(),
                "-ac",
                &audio::CHANNELS.to_string(),
                "-f",
                "wav",
                "-y",
            ])
            .arg(output);

        checked(run_with_timeout(cmd, self.timeouts.audio)?, "ffmpeg")?;
        Ok(())
    }
}

enum Stream {
    Stdout,
    Stderr,
}

/// Runs `cmd` to completion, killing it once `timeout` has elapsed.
///
/// stdout and stderr are drained on their own threads so a chatty child can
/// never block on a full pipe while we poll for its exit.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<Output, ToolError> {
    let tool = program_name(&cmd);
    debug!("Running {:?}", cmd);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;

    let (tx, rx) = bounded::<(Stream, Vec<u8>)>(2);
    drain(child.stdout.take(), Stream::Stdout, tx.clone());
    drain(child.stderr.take(), Stream::Stderr, tx);

    let status = supervise(&mut child, &tool, timeout)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    for (stream, bytes) in rx.iter() {
        match stream {
            Stream::Stdout => stdout = bytes,
            Stream::Stderr => stderr = bytes,
        }
    }

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

/// The parts of a running child process [`supervise`] needs.
trait Supervised {
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
    fn kill(&mut self) -> io::Result<()>;
    fn wait(&mut self) -> io::Result<ExitStatus>;
}

impl Supervised for Child {
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        Child::wait(self)
    }
}

/// Polls `child` until it exits. On timeout or a failed poll the child is
/// killed and reaped before the error is returned.
fn supervise<C: Supervised>(
    child: &mut C,
    tool: &str,
    timeout: Duration,
) -> Result<ExitStatus, ToolError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => {
                reap(child);
                return Err(ToolError::Io(e));
            }
        }
        if Instant::now() >= deadline {
            reap(child);
            return Err(ToolError::Timeout {
                tool: tool.to_string(),
                after: timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn reap<C: Supervised>(child: &mut C) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(reader: Option<R>, stream: Stream, tx: Sender<(Stream, Vec<u8>)>) {
    if let Some(mut reader) = reader {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = reader.read_to_end(&mut buffer);
            let _ = tx.send((stream, buffer));
        });
    }
}

fn program_name(cmd: &Command) -> String {
    let program: OsString = cmd.get_program().to_os_string();
    Path::new(&program)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

fn checked(output: Output, tool: &str) -> Result<Output, ToolError> {
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let start = stderr
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    Err(ToolError::Failed {
        tool: tool.to_string(),
        status: output.status.to_string(),
        stderr: stderr[start..].to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

fn parse_probe_duration(stdout: &[u8]) -> Result<f64, ToolError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ToolError::Parse(format!("ffprobe JSON: {e}")))?;

    let raw = probe
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| ToolError::Parse("no duration field in ffprobe output".into()))?;

    let duration: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ToolError::Parse(format!("unparsable duration {raw:?}")))?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(ToolError::Parse(format!("non-positive duration {duration}")));
    }
    Ok(duration)
}

/// Pulls `pts_time` out of each `metadata=print` block. A block carrying a
/// `lavfi.scene_score` at or below `threshold` is dropped; blocks whose
/// timestamp is unreadable (e.g. `NOPTS`) are skipped.
pub fn parse_scene_metadata(text: &str, threshold: f64) -> Vec<f64> {
    let mut blocks: Vec<(Option<f64>, Option<f64>)> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("frame:") {
            let pts_time = line
                .split_whitespace()
                .find_map(|token| token.strip_prefix("pts_time:"))
                .and_then(|value| value.parse::<f64>().ok());
            blocks.push((pts_time, None));
        } else if let Some(score) = line.strip_prefix("lavfi.scene_score=") {
            if let Some(block) = blocks.last_mut() {
                block.1 = score.trim().parse().ok();
            }
        }
    }

    blocks
        .into_iter()
        .filter(|(_, score)| score.map_or(true, |s| s > threshold))
        .filter_map(|(pts_time, _)| pts_time)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scene_metadata() {
        let text = "\
frame:0    pts:48048   pts_time:2.002
lavfi.scene_score=0.512300
frame:1    pts:99099   pts_time:4.129
lavfi.scene_score=0.301000
frame:2    pts:NOPTS   pts_time:NOPTS
lavfi.scene_score=0.900000
frame:3    pts:270270  pts_time:11.261
lavfi.scene_score=0.874512
";
        assert_eq!(parse_scene_metadata(text, 0.4), vec![2.002, 11.261]);
    }

    #[test]
    fn test_parse_scene_metadata_without_scores() {
        let text = "frame:0 pts:1 pts_time:1.5\nframe:1 pts:2 pts_time:3.25\n";
        assert_eq!(parse_scene_metadata(text, 0.3), vec![1.5, 3.25]);
        assert!(parse_scene_metadata("", 0.3).is_empty());
    }

    #[test]
    fn test_parse_probe_duration() {
        let json = br#"{"format": {"filename": "a.mp4", "duration": "37.040000"}}"#;
        assert_eq!(parse_probe_duration(json).unwrap(), 37.04);
    }

    #[test]
    fn test_parse_probe_duration_missing_field() {
        assert!(matches!(
            parse_probe_duration(br#"{"format": {"filename": "a.mp4"}}"#),
            Err(ToolError::Parse(_))
        ));
        assert!(matches!(
            parse_probe_duration(br#"{}"#),
            Err(ToolError::Parse(_))
        ));
        assert!(matches!(
            parse_probe_duration(br#"{"format": {"duration": "N/A"}}"#),
            Err(ToolError::Parse(_))
        ));
        assert!(parse_probe_duration(b"not json").is_err());
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let cmd = Command::new("/nonexistent/bin/ffmpeg-segmenter-test");
        let err = run_with_timeout(cmd, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ToolError::Spawn { ref tool, .. } if tool == "ffmpeg-segmenter-test"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let err = run_with_timeout(cmd, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_status_carries_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken stream >&2; exit 3"]);
        let output = run_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        let err = checked(output, "sh").unwrap_err();
        match err {
            ToolError::Failed { stderr, .. } => assert_eq!(stderr, "broken stream"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_poll_kills_and_reaps_child() {
        use std::os::unix::process::ExitStatusExt;

        #[derive(Default)]
        struct BrokenChild {
            killed: bool,
            reaped: bool,
        }

        impl Supervised for BrokenChild {
            fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
                Err(io::Error::new(io::ErrorKind::Other, "wait failed"))
            }

            fn kill(&mut self) -> io::Result<()> {
                self.killed = true;
                Ok(())
            }

            fn wait(&mut self) -> io::Result<ExitStatus> {
                self.reaped = true;
                Ok(ExitStatus::from_raw(9))
            }
        }

        let mut child = BrokenChild::default();
        let err = supervise(&mut child, "ffmpeg", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
        assert!(child.killed);
        assert!(child.reaped);
    }
}
