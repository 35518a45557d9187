use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{Result, SegmentError};

/// Identifier baked into every file name a run creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The shared scratch directory. Runs never lock it; they only ever touch
/// files prefixed with their own `RunId`.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| SegmentError::Workspace {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_path(&self, run: &RunId) -> PathBuf {
        self.root.join(format!("{run}-source.video"))
    }

    pub fn frame_path(&self, run: &RunId, scene_id: usize, frame_index: usize) -> PathBuf {
        self.root
            .join(format!("{run}-scene{scene_id:03}-frame{frame_index}.jpg"))
    }

    pub fn audio_path(&self, run: &RunId) -> PathBuf {
        self.root.join(format!("{run}-audio.wav"))
    }

    /// Files currently in the workspace, sorted.
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| SegmentError::Workspace {
                path: self.root.clone(),
                source: e.into(),
            })?;
            entries.push(entry.into_path());
        }
        entries.sort();
        Ok(entries)
    }
}

/// Per-run registry of temp files, deleted when dropped.
///
/// Paths are tracked before the step that writes them runs, so a step that
/// fails halfway still gets its output removed. Dropping happens on the
/// success path, on `?` early returns and on unwinding.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Mutex<Vec<PathBuf>>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, path: impl Into<PathBuf>) {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.into());
    }

    pub fn len(&self) -> usize {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes every tracked file that still exists. Failures are logged,
    /// never returned.
    pub fn cleanup(&self) {
        let paths = std::mem::take(&mut *self.paths.lock().unwrap_or_else(PoisonError::into_inner));
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed temp file {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove temp file {:?}: {}", path, e),
            }
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}
