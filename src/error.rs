use std::path::PathBuf;
use std::process::ExitStatus;

use crate::enums::Step;
use crate::stats::StatsError;
use crate::volume_loader::VolumeLoaderError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("expected artifact is missing: {path}", path = .0.display())]
    Path(PathBuf),

    #[error("{program} exited with {status}: {stderr}")]
    ExternalTool {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "no b-values for {path}: add a .bval sidecar next to the raw scan or `bvals` to the configuration",
        path = .0.display()
    )]
    MissingBValues(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] VolumeLoaderError),

    #[error("invalid volume: {0}")]
    Stats(#[from] StatsError),
}

/// Why a subject did not finish.
#[derive(Debug, thiserror::Error)]
#[error("{subject} failed{}: {error}", failed_at(.step))]
pub struct SubjectFailure {
    pub subject: String,
    /// `None` when the failure happened outside any step.
    pub step: Option<Step>,
    #[source]
    pub error: PipelineError,
}

fn failed_at(step: &Option<Step>) -> String {
    step.map(|step| format!(" at {step}")).unwrap_or_default()
}
