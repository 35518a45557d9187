use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use infer::MatcherType;

/// Bytes read from the head of a download before sniffing.
const SNIFF_LEN: u64 = 8192;

/// What the leading bytes of a downloaded file look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    Video(&'static str),
    /// Recognised, but not a video container. Only this counts against a
    /// download; unrecognised content still goes to the probe.
    Other(&'static str),
    Unknown,
}

pub fn sniff_video(path: &Path) -> Result<Sniffed> {
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    File::open(path)
        .and_then(|file| file.take(SNIFF_LEN).read_to_end(&mut head))
        .with_context(|| format!("Failed to read {:?} for mimetype detection", path))?;

    Ok(match infer::get(&head) {
        Some(kind) if kind.matcher_type() == MatcherType::Video => Sniffed::Video(kind.mime_type()),
        Some(kind) => Sniffed::Other(kind.mime_type()),
        None => Sniffed::Unknown,
    })
}
