use anyhow::{anyhow, Result};
use asciivid::{load_config, AppConfig, PipelineError, Progress, ProgressPhase, VideoPipeline};
use clap::Parser;
use dialoguer::FuzzySelect;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::Command as ProcCommand;
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: &[&str] = &["avi", "mp4", "m4v", "mov", "wmv", "mkv", "webm"];

#[derive(Parser, Debug)]
#[command(version, about = "Convert a video into an ASCII-art video.")]
struct Args {
    /// Input video file (prompted for when omitted)
    input: Option<PathBuf>,

    /// Output video file
    #[arg(short, long, default_value = "output.mp4")]
    output: PathBuf,

    /// Configuration file (JSON or TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of frames rendered at once
    #[arg(long)]
    workers: Option<usize>,

    /// x264 CRF of the output video (0-51, lower is better)
    #[arg(long)]
    quality: Option<u8>,

    /// TrueType/OpenType font for the glyphs instead of the built-in one
    #[arg(long)]
    font: Option<PathBuf>,

    /// Directory for extracted frames (must be new or empty)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Keep the extracted frames after finishing
    #[arg(long, default_value_t = false)]
    keep_work_dir: bool,

    /// Include the final extracted frame in the output video
    #[arg(long, default_value_t = false)]
    keep_last_frame: bool,

    /// Abort when no frame finishes for this many seconds (0 waits forever)
    #[arg(long)]
    stall_timeout: Option<u64>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Path to the ffprobe binary
    #[arg(long)]
    ffprobe: Option<PathBuf>,

    /// Show the output file in the file manager when done
    #[arg(long, default_value_t = false)]
    reveal: bool,

    /// Log details of every step
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn apply_to(&self, cfg: &mut AppConfig) {
        if let Some(w) = self.workers {
            cfg.max_workers = w;
        }
        if let Some(q) = self.quality {
            cfg.quality = q;
        }
        if let Some(f) = &self.font {
            cfg.font_path = Some(f.clone());
        }
        if let Some(d) = &self.work_dir {
            cfg.work_dir = Some(d.clone());
        }
        if self.keep_work_dir {
            cfg.keep_work_dir = true;
        }
        if self.keep_last_frame {
            cfg.drop_last_frame = false;
        }
        if let Some(s) = self.stall_timeout {
            cfg.stall_timeout_secs = s;
        }
        if let Some(p) = &self.ffmpeg {
            cfg.ffmpeg = Some(p.clone());
        }
        if let Some(p) = &self.ffprobe {
            cfg.ffprobe = Some(p.clone());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let input = match &args.input {
        Some(p) => p.clone(),
        None => match choose_input()? {
            Some(p) => p,
            None => {
                info!("No input selected, exiting.");
                return Ok(());
            }
        },
    };
    // Fail on a bad source before anything touches the disk.
    if !input.is_file() {
        return Err(PipelineError::SourceMissing(input).into());
    }

    let mut cfg = load_config(args.config.as_deref())?;
    args.apply_to(&mut cfg);
    let pipeline = VideoPipeline::new(cfg)?;

    let progress_bar: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
    let pb_clone = Arc::clone(&progress_bar);
    let summary = pipeline.run(&input, &args.output, move |progress: Progress| {
        let Ok(mut pb_guard) = pb_clone.lock() else {
            return;
        };
        match progress.phase {
            ProgressPhase::RenderingFrames => {
                if pb_guard.is_none() {
                    let pb = ProgressBar::new(progress.total as u64);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("#>-"),
                    );
                    *pb_guard = Some(pb);
                }
                if let Some(ref pb) = *pb_guard {
                    pb.set_position(progress.completed as u64);
                }
            }
            _ => {
                if let Some(pb) = pb_guard.take() {
                    pb.finish_with_message("Done");
                }
                info!("{}", progress.message);
            }
        }
    })?;

    if summary.frames_failed > 0 {
        warn!("{} frames were left unconverted", summary.frames_failed);
    }
    println!(
        "ASCII video written to {} ({} frames, {}x{} @ {} fps)",
        summary.output.display(),
        summary.frames_assembled,
        summary.width,
        summary.height,
        summary.frame_rate
    );

    if args.reveal {
        reveal(&summary.output);
    }
    Ok(())
}

/// Ask for a video in the current directory. `None` when the user backs out.
fn choose_input() -> Result<Option<PathBuf>> {
    let files = find_video_files();
    if files.is_empty() {
        return Err(anyhow!("No video files found in current directory."));
    }
    let selection = FuzzySelect::with_theme(&dialoguer::theme::ColorfulTheme::default())
        .with_prompt("Choose a video to convert (Esc to cancel)")
        .default(0)
        .items(&files)
        .interact_opt()?;
    Ok(selection.map(|i| PathBuf::from(&files[i])))
}

fn find_video_files() -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(".")
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path().is_file()
                && e.path().extension().is_some_and(|ext| {
                    ext.to_str()
                        .is_some_and(|s| VIDEO_EXTENSIONS.contains(&s.to_ascii_lowercase().as_str()))
                })
        })
        .map(|e| e.path().to_string_lossy().into_owned())
        .collect();
    files.sort();
    files
}

fn reveal(path: &Path) {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let result = if cfg!(windows) {
        ProcCommand::new("explorer")
            .arg(format!("/select,{}", path.display()))
            .status()
    } else if cfg!(target_os = "macos") {
        ProcCommand::new("open").arg("-R").arg(&path).status()
    } else {
        let dir = path.parent().unwrap_or(Path::new("."));
        ProcCommand::new("xdg-open").arg(dir).status()
    };
    // explorer.exe exits non-zero even on success, so only spawn errors count.
    if let Err(e) = result {
        warn!("could not open a file manager: {}", e);
    }
}
