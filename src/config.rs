//! Pipeline configuration.
//!
//! The configuration is read once, validated, and then passed by reference into
//! the runner. Nothing downstream re-reads the file or consults globals.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::planner::StepSelection;

const DEFAULT_READOUT_TIME: f64 = 0.05;
const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.5;

/// On-disk shape of the configuration (`args.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub data_directory: PathBuf,
    pub subject_names: Vec<String>,
    #[serde(default)]
    pub steps_to_run: Vec<String>,
    pub nb_dummies: Vec<usize>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_readout_time")]
    pub readout_time: f64,
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold: f64,
    /// b-value of every raw frame, used for subjects without a `.bval` sidecar.
    #[serde(default)]
    pub bvals: Option<Vec<f64>>,
    #[serde(default)]
    pub tools: ToolPaths,
}

fn default_readout_time() -> f64 {
    DEFAULT_READOUT_TIME
}

fn default_outlier_threshold() -> f64 {
    DEFAULT_OUTLIER_THRESHOLD
}

/// Executables used by the external steps. Bare names are resolved via `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub dwidenoise: PathBuf,
    pub mrdegibbs: PathBuf,
    pub topup: PathBuf,
    pub applytopup: PathBuf,
    pub ants_motion_corr: PathBuf,
    /// Passed to `topup --config`.
    pub topup_config: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            dwidenoise: "dwidenoise".into(),
            mrdegibbs: "mrdegibbs".into(),
            topup: "topup".into(),
            applytopup: "applytopup".into(),
            ants_motion_corr: "antsMotionCorr".into(),
            topup_config: "b02b0.cnf".into(),
        }
    }
}

/// Validated configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    data_directory: PathBuf,
    subjects: Vec<(String, usize)>,
    steps: StepSelection,
    parallel: bool,
    readout_time: f64,
    outlier_threshold: f64,
    bvals: Option<Vec<f64>>,
    tools: ToolPaths,
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> PipelineResult<Self> {
        let file: ConfigFile =
            serde_json::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        Self::try_from(file)
    }

    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    /// Subject names paired with their dummy-volume counts, in processing order.
    pub fn subjects(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.subjects.iter().map(|(name, dummies)| (name.as_str(), *dummies))
    }

    pub fn steps(&self) -> &StepSelection {
        &self.steps
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn readout_time(&self) -> f64 {
        self.readout_time
    }

    pub fn outlier_threshold(&self) -> f64 {
        self.outlier_threshold
    }

    pub fn bvals(&self) -> Option<&[f64]> {
        self.bvals.as_deref()
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub fn with_steps(mut self, steps: StepSelection) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

impl TryFrom<ConfigFile> for PipelineConfig {
    type Error = PipelineError;

    fn try_from(file: ConfigFile) -> PipelineResult<Self> {
        if file.subject_names.len() != file.nb_dummies.len() {
            return Err(PipelineError::Config(format!(
                "nb_dummies has {} entries but subject_names has {}",
                file.nb_dummies.len(),
                file.subject_names.len()
            )));
        }

        let mut seen = HashSet::new();
        for name in &file.subject_names {
            validate_subject_name(name)?;
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::Config(format!("subject '{name}' is listed twice")));
            }
        }

        let steps = StepSelection::from_names(&file.steps_to_run)
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        if !(file.readout_time.is_finite() && file.readout_time > 0.0) {
            return Err(PipelineError::Config("readout_time must be positive".into()));
        }
        if !(file.outlier_threshold.is_finite() && file.outlier_threshold > 0.0) {
            return Err(PipelineError::Config("outlier_threshold must be positive".into()));
        }
        if let Some(bvals) = &file.bvals {
            if bvals.is_empty() || bvals.iter().any(|b| !(b.is_finite() && *b >= 0.0)) {
                return Err(PipelineError::Config(
                    "bvals must be a non-empty list of non-negative numbers".into(),
                ));
            }
        }

        Ok(Self {
            data_directory: file.data_directory,
            subjects: file.subject_names.into_iter().zip(file.nb_dummies).collect(),
            steps,
            parallel: file.parallel,
            readout_time: file.readout_time,
            outlier_threshold: file.outlier_threshold,
            bvals: file.bvals,
            tools: file.tools,
        })
    }
}

/// Subject names become path components, so they must be a single plain component.
fn validate_subject_name(name: &str) -> PipelineResult<()> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\']);
    if bad {
        return Err(PipelineError::Config(format!("invalid subject name '{name}'")));
    }
    Ok(())
}
