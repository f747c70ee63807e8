//! # asciivid - ASCII Art Video Filter
//!
//! `asciivid` turns a video into an ASCII-art video. Frames are extracted with
//! ffmpeg, every frame is redrawn as colored monospace glyphs picked by
//! brightness, and the redrawn frames are encoded back into a video carrying
//! the original audio track.
//!
//! ## Features
//!
//! - Bounded worker pool: at most `max_workers` frames render at once
//! - Explicit completion barrier with a stall timeout
//! - Built-in 8×12 glyph font, or any TrueType/OpenType font via `ab_glyph`
//! - Progress reporting for integration with UI applications
//!
//! ## Example
//!
//! ```no_run
//! use asciivid::{AppConfig, VideoPipeline};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = VideoPipeline::new(AppConfig::default())?;
//! let summary = pipeline.run(Path::new("input.mp4"), Path::new("output.mp4"), |_| {})?;
//! println!("{} frames assembled", summary.frames_assembled);
//! # Ok(())
//! # }
//! ```
//!
//! ## Rendering a single frame
//!
//! ```
//! use asciivid::FrameRenderer;
//! use image::{Rgb, RgbImage};
//!
//! let renderer = FrameRenderer::builtin().unwrap();
//! let frame = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));
//! let ascii = renderer.render(&frame);
//! assert_eq!(ascii.dimensions(), (64, 48));
//! ```

pub mod atlas;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod frames;
pub mod glyph;
pub mod pipeline;
pub mod render;
pub mod scheduler;

use serde::{Deserialize, Serialize};

pub use atlas::GlyphAtlas;
pub use config::{load_config, AppConfig};
pub use error::PipelineError;
pub use frames::{Frame, WorkDir};
pub use glyph::{brightness, GlyphRamp, DEFAULT_GLYPH_RAMP};
pub use pipeline::{PipelineSummary, VideoPipeline};
pub use render::FrameRenderer;
pub use scheduler::{ConcurrencyBudget, RenderJob, ScheduleReport, Scheduler, SchedulerOptions};

/// Represents the current phase of a conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Splitting the source video into frames
    ExtractingFrames,
    /// Redrawing frames as ASCII art
    RenderingFrames,
    /// Encoding the rendered frames into a video
    AssemblingVideo,
    /// Copying the source audio into the new video
    MergingAudio,
    /// Conversion completed successfully
    Complete,
}

/// Progress information for conversion operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// Current phase of the conversion
    pub phase: ProgressPhase,
    /// Number of items completed in the current phase
    pub completed: usize,
    /// Total number of items in the current phase (0 if unknown/indeterminate)
    pub total: usize,
    /// Percentage complete (0.0 to 100.0)
    pub percentage: f64,
    /// Human-readable message describing current status
    pub message: String,
}

impl Progress {
    fn indeterminate(phase: ProgressPhase, message: &str) -> Self {
        Self {
            phase,
            completed: 0,
            total: 0,
            percentage: 0.0,
            message: message.to_string(),
        }
    }

    pub fn extracting_frames() -> Self {
        Self::indeterminate(ProgressPhase::ExtractingFrames, "Extracting frames from video...")
    }

    pub fn rendering_frames(completed: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self {
            phase: ProgressPhase::RenderingFrames,
            completed,
            total,
            percentage,
            message: format!("Rendering frame {} of {}", completed, total),
        }
    }

    pub fn assembling_video() -> Self {
        Self::indeterminate(ProgressPhase::AssemblingVideo, "Assembling video...")
    }

    pub fn merging_audio() -> Self {
        Self::indeterminate(ProgressPhase::MergingAudio, "Adding original audio...")
    }

    pub fn complete(total_frames: usize) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            completed: total_frames,
            total: total_frames,
            percentage: 100.0,
            message: format!("Conversion complete: {} frames", total_frames),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_progress_reports_percentage() {
        let p = Progress::rendering_frames(25, 200);
        assert_eq!(p.phase, ProgressPhase::RenderingFrames);
        assert!((p.percentage - 12.5).abs() < f64::EPSILON);
        assert_eq!(Progress::rendering_frames(0, 0).percentage, 0.0);
    }

    #[test]
    fn complete_is_full() {
        let p = Progress::complete(42);
        assert_eq!((p.completed, p.total), (42, 42));
        assert_eq!(p.percentage, 100.0);
    }
}
