use std::path::PathBuf;
use std::time::Duration;

/// Fatal conditions that stop a conversion run.
///
/// These travel inside `anyhow::Error` like every other failure in the crate;
/// callers that care about the kind can `downcast_ref::<PipelineError>()`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("source video {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("could not read the frame rate of {path}: {reason}")]
    FrameRate { path: PathBuf, reason: String },

    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("frame extraction produced no frames in {0}")]
    NoFrames(PathBuf),

    #[error("rendering stalled: {completed}/{expected} frames finished, none in the last {waited:?}")]
    Stalled {
        completed: usize,
        expected: usize,
        waited: Duration,
    },

    #[error("workers went away after {completed}/{expected} frames")]
    WorkersLost { completed: usize, expected: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
