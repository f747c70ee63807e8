//! Configuration file loading.
//!
//! Settings come from the first file found among:
//!
//! 1. an explicit path (`--config`)
//! 2. `asciivid.json` / `asciivid.toml` in the platform config dir (`<config>/asciivid/`)
//! 3. `asciivid.json` / `asciivid.toml` in the current directory
//!
//! Every key is optional. Missing keys take the built-in default.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::atlas::MAX_CELL_SIZE;
use crate::error::PipelineError;
use crate::glyph::{GlyphRamp, DEFAULT_GLYPH_RAMP};
use crate::scheduler::SchedulerOptions;

const CONFIG_STEM: &str = "asciivid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Upper bound on frames rendered at the same time.
    pub max_workers: usize,
    /// Sleep between budget checks while every worker is busy.
    pub dispatch_poll_ms: u64,
    /// Abort when no frame finishes for this long. 0 waits forever.
    pub stall_timeout_secs: u64,
    pub glyph_ramp: String,
    /// Glyph cell for font-rasterized glyphs. The built-in font is always 8x12.
    pub cell_width: u32,
    pub cell_height: u32,
    /// TrueType/OpenType font for the glyphs. Built-in bitmaps when unset.
    pub font_path: Option<PathBuf>,
    pub font_px: f32,
    /// x264 CRF of the assembled video.
    pub quality: u8,
    /// Leave the final extracted frame out of the assembled video.
    pub drop_last_frame: bool,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub keep_work_dir: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_workers: 64,
            dispatch_poll_ms: 100,
            stall_timeout_secs: 300,
            glyph_ramp: DEFAULT_GLYPH_RAMP.to_string(),
            cell_width: 8,
            cell_height: 12,
            font_path: None,
            font_px: 12.0,
            quality: 20,
            drop_last_frame: true,
            ffmpeg: None,
            ffprobe: None,
            work_dir: None,
            keep_work_dir: false,
        }
    }
}

impl AppConfig {
    /// Parse a config file; the format follows the extension (`.toml`, else JSON).
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let cfg: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).with_context(|| format!("parsing config toml {}", path.display()))?,
            _ => serde_json::from_str(&text).with_context(|| format!("parsing config json {}", path.display()))?,
        };
        cfg.validate()
            .with_context(|| format!("in config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(anyhow!(PipelineError::InvalidConfig(msg)));
        if self.max_workers == 0 {
            return invalid("max_workers must be at least 1".into());
        }
        if let Err(e) = GlyphRamp::new(&self.glyph_ramp) {
            return invalid(e.to_string());
        }
        let side = 1..=MAX_CELL_SIZE;
        if !side.contains(&self.cell_width) || !side.contains(&self.cell_height) {
            return invalid(format!(
                "glyph cell must be within 1x1..={}x{}, got {}x{}",
                MAX_CELL_SIZE, MAX_CELL_SIZE, self.cell_width, self.cell_height
            ));
        }
        if !(self.font_px > 0.0) {
            return invalid(format!("font_px must be positive, got {}", self.font_px));
        }
        if self.quality > 51 {
            return invalid(format!("quality (crf) must be within 0..=51, got {}", self.quality));
        }
        Ok(())
    }

    pub fn glyph_ramp(&self) -> Result<GlyphRamp> {
        GlyphRamp::new(&self.glyph_ramp)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_workers: self.max_workers,
            poll_interval: Duration::from_millis(self.dispatch_poll_ms),
            stall_timeout: match self.stall_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Files checked, in order, when no explicit config path is given.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(d) = dirs::config_dir() {
        let d = d.join(CONFIG_STEM);
        tried.push(d.join(format!("{}.json", CONFIG_STEM)));
        tried.push(d.join(format!("{}.toml", CONFIG_STEM)));
    }
    tried.push(PathBuf::from(format!("{}.json", CONFIG_STEM)));
    tried.push(PathBuf::from(format!("{}.toml", CONFIG_STEM)));
    tried
}

/// Load the explicit config, else the first candidate that exists, else defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return AppConfig::from_file(path);
    }
    for p in candidate_paths() {
        if p.exists() {
            log::debug!("using config {}", p.display());
            return AppConfig::from_file(&p);
        }
    }
    Ok(AppConfig::default())
}
