use anyhow::{Context, Result};
use log::{debug, warn};

use crate::error::PipelineError;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name pattern handed to ffmpeg for extraction and assembly.
pub const FRAME_PATTERN: &str = "%08d.png";

/// One extracted frame on disk. `index` is its position in the sorted listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    pub path: PathBuf,
}

/// Scratch directory holding the frames of one run.
///
/// Only an empty or missing directory is accepted, so everything inside it
/// belongs to the run. On drop the contents are deleted, and the directory
/// itself too if this guard created it, unless [`WorkDir::keep`] was called.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    created: bool,
    keep: bool,
}

impl WorkDir {
    /// Use `path` as the work dir, creating it when missing.
    ///
    /// An existing directory must be empty; it is never cleared.
    pub fn create(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            fs::create_dir_all(&path).with_context(|| format!("creating work dir {}", path.display()))?;
            return Ok(Self {
                path,
                created: true,
                keep: false,
            });
        }
        if !path.is_dir() {
            return Err(PipelineError::InvalidConfig(format!("work dir {} is not a directory", path.display())).into());
        }
        let mut entries = fs::read_dir(&path).with_context(|| format!("reading {}", path.display()))?;
        if entries.next().is_some() {
            return Err(PipelineError::InvalidConfig(format!(
                "work dir {} is not empty; pick an empty or new directory",
                path.display()
            ))
            .into());
        }
        debug!("using existing empty work dir {}", path.display());
        Ok(Self {
            path,
            created: false,
            keep: false,
        })
    }

    /// Default location: a fresh directory under the system temp dir.
    pub fn default_path() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("asciivid-{}-{:08x}", std::process::id(), nanos))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Leave the directory on disk when this guard is dropped.
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if self.created {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!("could not remove work dir {}: {}", self.path.display(), e);
            }
            return;
        }
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("could not clean work dir {}: {}", self.path.display(), e);
                return;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let p = entry.path();
            let removed = if p.is_dir() {
                fs::remove_dir_all(&p)
            } else {
                fs::remove_file(&p)
            };
            if let Err(e) = removed {
                warn!("could not remove {}: {}", p.display(), e);
            }
        }
    }
}

/// Whether `path` is `dir` or lies somewhere below it.
///
/// Both paths are made absolute and resolved through their longest existing
/// ancestor, so symlinks and `.` segments do not hide an overlap.
pub fn is_within(path: &Path, dir: &Path) -> Result<bool> {
    Ok(resolve(path)?.starts_with(resolve(dir)?))
}

fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().context("reading current directory")?.join(path)
    };
    for base in absolute.ancestors() {
        if base.exists() {
            let rest = absolute.strip_prefix(base).unwrap_or(Path::new(""));
            let base = fs::canonicalize(base).with_context(|| format!("resolving {}", base.display()))?;
            return Ok(base.join(rest));
        }
    }
    Ok(absolute)
}

/// PNG frames directly inside `dir`, in ascending name order.
pub fn list_frames(dir: &Path) -> Vec<Frame> {
    let mut pngs: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|e| e == "png").unwrap_or(false))
        .collect();
    pngs.sort();
    pngs.into_iter()
        .enumerate()
        .map(|(index, path)| Frame { index, path })
        .collect()
}

/// Delete the final frame so it is left out of assembly.
///
/// A sequence of one frame is left untouched. Returns the removed frame.
pub fn drop_last_frame(frames: &mut Vec<Frame>) -> Result<Option<Frame>> {
    if frames.len() < 2 {
        warn!("only {} frame(s) extracted; keeping the last frame", frames.len());
        return Ok(None);
    }
    let Some(last) = frames.pop() else {
        return Ok(None);
    };
    fs::remove_file(&last.path).with_context(|| format!("removing {}", last.path.display()))?;
    debug!("dropped final frame {}", last.path.display());
    Ok(Some(last))
}
