//! End-to-end conversion: extract, render, assemble, add audio.

use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::atlas::GlyphAtlas;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::ffmpeg::{self, AssemblyParams, Tools};
use crate::frames::{self, Frame, WorkDir};
use crate::render::FrameRenderer;
use crate::scheduler::{ScheduleReport, Scheduler};
use crate::Progress;

const SILENT_VIDEO: &str = "video.avi";
const AUDIO_TRACK: &str = "audio.mka";

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub output: PathBuf,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub frames_extracted: usize,
    pub frames_rendered: usize,
    /// Frames that could not be rendered and went into the video unmodified.
    pub frames_failed: usize,
    pub frames_assembled: usize,
    pub had_audio: bool,
}

pub struct VideoPipeline {
    config: AppConfig,
    tools: Tools,
    renderer: Arc<FrameRenderer>,
    scheduler: Scheduler,
}

impl VideoPipeline {
    /// Validate `config`, locate ffmpeg/ffprobe and build the glyph atlas.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let tools = ffmpeg::resolve_tools(config.ffmpeg.clone(), config.ffprobe.clone())?;
        Self::with_tools(config, tools)
    }

    pub fn with_tools(config: AppConfig, tools: Tools) -> Result<Self> {
        let renderer = Arc::new(build_renderer(&config)?);
        let scheduler = Scheduler::new(config.scheduler_options())?;
        Ok(Self {
            config,
            tools,
            renderer,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn renderer(&self) -> &FrameRenderer {
        &self.renderer
    }

    /// Convert `input` into an ASCII-art video at `output`.
    ///
    /// The source is checked and probed before anything is written. An output
    /// inside the work dir is refused. The work dir is cleaned afterwards,
    /// whether the run succeeded or not, unless `keep_work_dir` is set.
    pub fn run<F>(&self, input: &Path, output: &Path, progress: F) -> Result<PipelineSummary>
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        if !input.is_file() {
            return Err(PipelineError::SourceMissing(input.to_path_buf()).into());
        }
        let work_path = self.config.work_dir.clone().unwrap_or_else(WorkDir::default_path);
        if frames::is_within(output, &work_path)? {
            return Err(PipelineError::InvalidConfig(format!(
                "output {} lies inside the work dir {}, which is cleaned up after the run",
                output.display(),
                work_path.display()
            ))
            .into());
        }
        let frame_rate = ffmpeg::probe_frame_rate(&self.tools, input)?;
        let had_audio = ffmpeg::probe_has_audio(&self.tools, input)?;
        info!(
            "source {}: {} fps, {}",
            input.display(),
            frame_rate,
            if had_audio { "with audio" } else { "no audio" }
        );

        let mut work = WorkDir::create(work_path)?;
        if self.config.keep_work_dir {
            work.keep();
        }

        let progress = Arc::new(progress);
        progress(Progress::extracting_frames());
        ffmpeg::extract_frames(&self.tools, input, work.path())?;
        let mut frame_list = frames::list_frames(work.path());
        if frame_list.is_empty() {
            return Err(PipelineError::NoFrames(work.path().to_path_buf()).into());
        }
        let frames_extracted = frame_list.len();
        info!("extracted {} frames into {}", frames_extracted, work.path().display());

        let report = render_frames(&self.scheduler, Arc::clone(&self.renderer), frame_list.clone(), Arc::clone(&progress))?;
        if !report.failures.is_empty() {
            warn!(
                "{} of {} frames could not be rendered and are left as extracted",
                report.failures.len(),
                report.total
            );
        }

        if self.config.drop_last_frame {
            frames::drop_last_frame(&mut frame_list)?;
        }
        let first = &frame_list[0].path;
        let (w, h) = image::image_dimensions(first).with_context(|| format!("reading size of {}", first.display()))?;
        let (width, height) = ffmpeg::even_dimensions(w, h)?;

        progress(Progress::assembling_video());
        let silent = work.join(SILENT_VIDEO);
        let params = AssemblyParams {
            frame_rate,
            quality: self.config.quality,
            width,
            height,
        };
        ffmpeg::assemble_video(&self.tools, work.path(), &params, &silent)?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        if had_audio {
            progress(Progress::merging_audio());
            let audio = work.join(AUDIO_TRACK);
            ffmpeg::extract_audio(&self.tools, input, &audio)?;
            ffmpeg::merge_audio(&self.tools, &silent, &audio, output)?;
        } else {
            ffmpeg::remux_video(&self.tools, &silent, output)?;
        }

        if self.config.keep_work_dir {
            info!("work dir kept at {}", work.path().display());
        }
        progress(Progress::complete(frame_list.len()));
        info!("wrote {}", output.display());

        Ok(PipelineSummary {
            output: output.to_path_buf(),
            frame_rate,
            width,
            height,
            frames_extracted,
            frames_rendered: report.succeeded,
            frames_failed: report.failures.len(),
            frames_assembled: frame_list.len(),
            had_audio,
        })
    }
}

/// Renderer for `config`: rasterized from `font_path` when set, built-in otherwise.
pub fn build_renderer(config: &AppConfig) -> Result<FrameRenderer> {
    let ramp = config.glyph_ramp()?;
    let atlas = match &config.font_path {
        Some(path) => {
            info!("rasterizing glyphs from {} at {}px", path.display(), config.font_px);
            GlyphAtlas::from_font_file(path, config.font_px, &ramp, (config.cell_width, config.cell_height))?
        }
        None => GlyphAtlas::builtin(&ramp)?,
    };
    Ok(FrameRenderer::new(ramp, Arc::new(atlas)))
}

/// Render every frame in place on `scheduler`'s workers.
///
/// A frame that fails is logged and reported; the others carry on.
pub fn render_frames<F>(
    scheduler: &Scheduler,
    renderer: Arc<FrameRenderer>,
    frame_list: Vec<Frame>,
    progress: Arc<F>,
) -> Result<ScheduleReport>
where
    F: Fn(Progress) + Send + Sync + 'static,
{
    let total = frame_list.len();
    progress(Progress::rendering_frames(0, total));
    info!(
        "rendering {} frames with up to {} workers",
        total,
        scheduler.options().max_workers
    );
    scheduler.run(
        frame_list,
        move |job| renderer.render_file(&job.item.path),
        move |done, total| progress(Progress::rendering_frames(done, total)),
    )
}
