//! Full-track audio extraction for the transcription consumer.
//!
//! The output format is a fixed contract: mono, 16 kHz, 16-bit signed PCM in
//! a WAV container. It is not configurable.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use tracing::info;

use crate::error::{Result, SegmentError};
use crate::media::ffmpeg::MediaToolkit;
use crate::utils::workspace::{RunId, TempFiles, Workspace};

pub const CHANNELS: u16 = 1;
pub const SAMPLE_RATE: u32 = 16_000;
pub const BITS_PER_SAMPLE: u16 = 16;

/// Extracts the audio of a local video file and returns the WAV bytes.
///
/// The intermediate file lives in the workspace only for the duration of
/// this call.
pub fn extract_audio(
    toolkit: &dyn MediaToolkit,
    workspace: &Workspace,
    input: &Path,
) -> Result<Vec<u8>> {
    let run = RunId::new();
    let temp = TempFiles::new();
    let output = workspace.audio_path(&run);
    temp.track(&output);

    toolkit
        .extract_audio(input, &output)
        .map_err(|e| SegmentError::AudioExtraction(e.to_string()))?;

    let bytes = fs::read(&output).map_err(|e| {
        SegmentError::AudioExtraction(format!("failed to read {:?}: {}", output, e))
    })?;
    verify_wav(&bytes)?;

    info!(run = %run, bytes = bytes.len(), "Extracted audio track");
    Ok(bytes)
}

/// Checks the bytes are a WAV stream in the transcription format.
pub fn verify_wav(bytes: &[u8]) -> Result<()> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| SegmentError::AudioExtraction(format!("not a WAV stream: {e}")))?;
    let spec = reader.spec();

    if spec.channels != CHANNELS
        || spec.sample_rate != SAMPLE_RATE
        || spec.bits_per_sample != BITS_PER_SAMPLE
        || spec.sample_format != SampleFormat::Int
    {
        return Err(SegmentError::AudioExtraction(format!(
            "expected {CHANNELS} ch / {SAMPLE_RATE} Hz / {BITS_PER_SAMPLE}-bit PCM, got {} ch / {} Hz / {}-bit {:?}",
            spec.channels, spec.sample_rate, spec.bits_per_sample, spec.sample_format
        )));
    }
    Ok(())
}
