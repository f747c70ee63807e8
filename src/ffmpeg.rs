//! ffmpeg and ffprobe, run as child processes.
//!
//! Every call checks the exit status. A failing tool becomes
//! [`PipelineError::ToolFailed`] carrying the tail of its stderr.

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use which::which;

use crate::error::PipelineError;
use crate::frames::FRAME_PATTERN;

/// stderr lines kept in a [`PipelineError::ToolFailed`] message.
const STDERR_TAIL_LINES: usize = 12;

#[derive(Debug, Clone)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

pub fn resolve_tools(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Result<Tools> {
    Ok(Tools {
        ffmpeg: resolve_bin(ffmpeg, "ffmpeg")?,
        ffprobe: resolve_bin(ffprobe, "ffprobe")?,
    })
}

fn resolve_bin(bin_opt: Option<PathBuf>, default: &str) -> Result<PathBuf> {
    if let Some(path) = bin_opt {
        if path.is_file() {
            return Ok(path);
        }
        bail!("Provided binary not found: {}", path.display());
    }

    which(default)
        .or_else(|_| {
            if cfg!(windows) {
                which(format!("{default}.exe"))
            } else {
                Err(which::Error::CannotFindBinaryPath)
            }
        })
        .with_context(|| format!("`{default}` not found in PATH"))
}

/// Settings for turning the frame sequence back into a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyParams {
    pub frame_rate: u32,
    /// x264 constant rate factor, 0..=51.
    pub quality: u8,
    pub width: u32,
    pub height: u32,
}

fn args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    items.into_iter().map(|s| s.as_ref().to_os_string()).collect()
}

pub fn extraction_args(input: &Path, frames_dir: &Path) -> Vec<OsString> {
    let mut a = args(["-hide_banner", "-loglevel", "error", "-i"]);
    a.push(input.into());
    a.push(frames_dir.join(FRAME_PATTERN).into());
    a
}

pub fn assembly_args(frames_dir: &Path, params: &AssemblyParams, out: &Path) -> Vec<OsString> {
    let rate = params.frame_rate.to_string();
    let crf = params.quality.to_string();
    let size = format!("{}x{}", params.width, params.height);
    let mut a = args([
        "-hide_banner",
        "-loglevel",
        "error",
        "-framerate",
        rate.as_str(),
        "-pattern_type",
        "sequence",
        "-i",
    ]);
    a.push(frames_dir.join(FRAME_PATTERN).into());
    a.extend(args([
        "-y",
        "-pix_fmt",
        "yuv420p",
        "-color_trc",
        "smpte2084",
        "-color_primaries",
        "bt2020",
        "-vcodec",
        "libx264",
        "-crf",
        crf.as_str(),
        "-vsync",
        "vfr",
        "-s",
        size.as_str(),
    ]));
    a.push(out.into());
    a
}

pub fn audio_extract_args(input: &Path, out: &Path) -> Vec<OsString> {
    let mut a = args(["-hide_banner", "-loglevel", "error", "-i"]);
    a.push(input.into());
    a.extend(args(["-vn", "-acodec", "copy", "-y"]));
    a.push(out.into());
    a
}

pub fn merge_args(video: &Path, audio: &Path, out: &Path) -> Vec<OsString> {
    let mut a = args(["-hide_banner", "-loglevel", "error", "-i"]);
    a.push(video.into());
    a.push("-i".into());
    a.push(audio.into());
    a.extend(args(["-c:v", "copy", "-c:a", "aac", "-y"]));
    a.push(out.into());
    a
}

pub fn remux_args(video: &Path, out: &Path) -> Vec<OsString> {
    let mut a = args(["-hide_banner", "-loglevel", "error", "-i"]);
    a.push(video.into());
    a.extend(args(["-c:v", "copy", "-y"]));
    a.push(out.into());
    a
}

fn frame_rate_probe_args(input: &Path) -> Vec<OsString> {
    let mut a = args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=r_frame_rate",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]);
    a.push(input.into());
    a
}

fn audio_probe_args(input: &Path) -> Vec<OsString> {
    let mut a = args([
        "-v",
        "error",
        "-select_streams",
        "a",
        "-show_entries",
        "stream=index",
        "-of",
        "csv=p=0",
    ]);
    a.push(input.into());
    a
}

fn run_tool(bin: &Path, label: &str, arguments: &[OsString]) -> Result<Output> {
    debug!("running {} {:?}", bin.display(), arguments);
    let output = Command::new(bin)
        .args(arguments)
        .output()
        .with_context(|| format!("running {}", label))?;
    if !output.status.success() {
        return Err(PipelineError::ToolFailed {
            tool: label.to_string(),
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        }
        .into());
    }
    Ok(output)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail
    }
}

/// Split `input` into numbered PNG frames inside `frames_dir`.
pub fn extract_frames(tools: &Tools, input: &Path, frames_dir: &Path) -> Result<()> {
    run_tool(&tools.ffmpeg, "ffmpeg frame extraction", &extraction_args(input, frames_dir))?;
    Ok(())
}

/// Encode the frame sequence in `frames_dir` into a silent video.
pub fn assemble_video(tools: &Tools, frames_dir: &Path, params: &AssemblyParams, out: &Path) -> Result<()> {
    run_tool(&tools.ffmpeg, "ffmpeg video assembly", &assembly_args(frames_dir, params, out))?;
    Ok(())
}

/// Copy the audio track of `input`, untouched, into `out`.
pub fn extract_audio(tools: &Tools, input: &Path, out: &Path) -> Result<()> {
    run_tool(&tools.ffmpeg, "ffmpeg audio extraction", &audio_extract_args(input, out))?;
    Ok(())
}

/// Mux a silent video with an audio file.
pub fn merge_audio(tools: &Tools, video: &Path, audio: &Path, out: &Path) -> Result<()> {
    run_tool(&tools.ffmpeg, "ffmpeg audio merge", &merge_args(video, audio, out))?;
    Ok(())
}

/// Rewrap a video stream into the container implied by `out`.
pub fn remux_video(tools: &Tools, video: &Path, out: &Path) -> Result<()> {
    run_tool(&tools.ffmpeg, "ffmpeg remux", &remux_args(video, out))?;
    Ok(())
}

/// Integer frames per second of the first video stream.
pub fn probe_frame_rate(tools: &Tools, input: &Path) -> Result<u32> {
    let fail = |reason: String| PipelineError::FrameRate {
        path: input.to_path_buf(),
        reason,
    };
    let output = run_tool(&tools.ffprobe, "ffprobe", &frame_rate_probe_args(input))
        .map_err(|e| fail(format!("{:#}", e)))?;
    let raw = String::from_utf8_lossy(&output.stdout);
    let millihertz = parse_frame_rate_millihertz(&raw)
        .ok_or_else(|| fail(format!("unrecognized frame rate {:?}", raw.trim())))?;
    let fps = fps_from_millihertz(millihertz);
    if fps == 0 {
        return Err(fail(format!("{} mHz is below 1 fps", millihertz)).into());
    }
    Ok(fps)
}

/// Whether `input` has at least one audio stream.
pub fn probe_has_audio(tools: &Tools, input: &Path) -> Result<bool> {
    let output = run_tool(&tools.ffprobe, "ffprobe", &audio_probe_args(input))?;
    Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
}

/// Parse ffprobe's `r_frame_rate` (`30000/1001`, `25/1` or a plain decimal)
/// into millihertz.
pub fn parse_frame_rate_millihertz(raw: &str) -> Option<u64> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_end_matches(',');
    match line.split_once('/') {
        Some((num, den)) => {
            let num: u64 = num.trim().parse().ok()?;
            let den: u64 = den.trim().parse().ok()?;
            if den == 0 {
                return None;
            }
            Some(num * 1000 / den)
        }
        None => {
            let hz: f64 = line.parse().ok()?;
            if !hz.is_finite() || hz < 0.0 {
                return None;
            }
            Some((hz * 1000.0).round() as u64)
        }
    }
}

/// Whole frames per second; the fractional part is truncated.
pub fn fps_from_millihertz(millihertz: u64) -> u32 {
    u32::try_from(millihertz / 1000).unwrap_or(u32::MAX)
}

/// Largest even size not above `width`x`height`, at least 2x2, as yuv420p
/// requires.
pub fn even_dimensions(width: u32, height: u32) -> Result<(u32, u32)> {
    if width < 2 || height < 2 {
        return Err(anyhow!("frames of {}x{} are too small to encode", width, height));
    }
    Ok((width & !1, height & !1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(a: &[OsString]) -> Vec<String> {
        a.iter().map(|s| s.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn parses_rational_frame_rates() {
        assert_eq!(parse_frame_rate_millihertz("30000/1001\n"), Some(29970));
        assert_eq!(parse_frame_rate_millihertz("25/1"), Some(25000));
        assert_eq!(parse_frame_rate_millihertz("1/1"), Some(1000));
        assert_eq!(parse_frame_rate_millihertz("\n24000/1001,\n"), Some(23976));
    }

    #[test]
    fn parses_decimal_frame_rates() {
        assert_eq!(parse_frame_rate_millihertz("59.94"), Some(59940));
        assert_eq!(parse_frame_rate_millihertz("12"), Some(12000));
    }

    #[test]
    fn rejects_garbage_frame_rates() {
        assert_eq!(parse_frame_rate_millihertz(""), None);
        assert_eq!(parse_frame_rate_millihertz("0/0"), None);
        assert_eq!(parse_frame_rate_millihertz("N/A"), None);
        assert_eq!(parse_frame_rate_millihertz("-5"), None);
    }

    #[test]
    fn fps_truncates_millihertz() {
        assert_eq!(fps_from_millihertz(29970), 29);
        assert_eq!(fps_from_millihertz(60000), 60);
        assert_eq!(fps_from_millihertz(999), 0);
    }

    #[test]
    fn even_dimensions_round_down() {
        assert_eq!(even_dimensions(2, 2).unwrap(), (2, 2));
        assert_eq!(even_dimensions(641, 361).unwrap(), (640, 360));
        assert!(even_dimensions(1, 10).is_err());
    }

    #[test]
    fn extraction_writes_the_numbered_pattern() {
        let a = strings(&extraction_args(Path::new("in put.mp4"), Path::new("/tmp/work")));
        assert_eq!(a[a.len() - 2], "in put.mp4");
        assert_eq!(a.last().unwrap(), "/tmp/work/%08d.png");
    }

    #[test]
    fn assembly_carries_rate_quality_and_size() {
        let params = AssemblyParams {
            frame_rate: 24,
            quality: 20,
            width: 640,
            height: 360,
        };
        let a = strings(&assembly_args(Path::new("/tmp/work"), &params, Path::new("/tmp/work/video.avi")));
        let after = |flag: &str| a[a.iter().position(|s| s == flag).unwrap() + 1].clone();
        assert_eq!(after("-framerate"), "24");
        assert_eq!(after("-i"), "/tmp/work/%08d.png");
        assert_eq!(after("-crf"), "20");
        assert_eq!(after("-s"), "640x360");
        assert_eq!(after("-vcodec"), "libx264");
        assert_eq!(after("-pix_fmt"), "yuv420p");
        assert_eq!(a.last().unwrap(), "/tmp/work/video.avi");
    }

    #[test]
    fn merge_copies_video_and_encodes_aac() {
        let a = strings(&merge_args(Path::new("v.avi"), Path::new("a.mka"), Path::new("out.mp4")));
        assert_eq!(
            a[3..],
            ["-i", "v.avi", "-i", "a.mka", "-c:v", "copy", "-c:a", "aac", "-y", "out.mp4"]
        );
    }

    #[test]
    fn audio_extraction_copies_the_stream() {
        let a = strings(&audio_extract_args(Path::new("src.mp4"), Path::new("a.mka")));
        assert_eq!(a[3..], ["-i", "src.mp4", "-vn", "-acodec", "copy", "-y", "a.mka"]);
    }

    #[test]
    fn stderr_tail_keeps_the_last_lines() {
        let text: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(text.as_bytes());
        assert!(tail.starts_with("line 18"));
        assert!(tail.ends_with("line 29"));
        assert_eq!(stderr_tail(b"\n\n"), "no diagnostic output");
    }

    #[test]
    fn missing_explicit_binary_is_an_error() {
        let err = resolve_bin(Some(PathBuf::from("/nonexistent/ffmpeg")), "ffmpeg").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ffmpeg"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_reports_its_status() {
        let err = run_tool(Path::new("false"), "false", &[]).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::ToolFailed { tool, .. }) => assert_eq!(tool, "false"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
