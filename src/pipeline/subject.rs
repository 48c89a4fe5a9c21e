use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::enums::Step;
use crate::error::{PipelineError, PipelineResult, SubjectFailure};
use crate::ops::ExternalOps;
use crate::pipeline::layout::SubjectLayout;
use crate::pipeline::planner::{StepSelection, should_run};

/// Neighbourhood size passed to `dwidenoise -extent`.
pub const DENOISE_EXTENT: u32 = 9;

/// Step-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CleanAndTrim {
        dummy_volumes: usize,
        bvals_in: PathBuf,
        bvals_out: PathBuf,
    },
    Denoise {
        noise_map: PathBuf,
        extent: u32,
        force: bool,
    },
    Unring,
    DistortionCorrect {
        reverse_pe: PathBuf,
        work_dir: PathBuf,
    },
    MotionCorrect {
        output_prefix: PathBuf,
    },
    FitCoefficient {
        bvals: PathBuf,
    },
}

/// One step of one subject with concrete paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Step,
    pub input: PathBuf,
    pub output: PathBuf,
    pub operation: Operation,
}

impl StepRecord {
    /// Files that must exist before the step may run.
    ///
    /// b-value sidecars are optional and never listed here.
    pub fn required_inputs(&self) -> Vec<&Path> {
        let mut inputs = vec![self.input.as_path()];
        if let Operation::DistortionCorrect { reverse_pe, .. } = &self.operation {
            inputs.push(reverse_pe.as_path());
        }
        inputs
    }

    /// Secondary files the step writes next to its output.
    pub fn aux_outputs(&self) -> Vec<&Path> {
        match &self.operation {
            Operation::CleanAndTrim { bvals_out, .. } => vec![bvals_out.as_path()],
            Operation::Denoise { noise_map, .. } => vec![noise_map.as_path()],
            _ => Vec::new(),
        }
    }
}

/// The full chain for one subject. Each step consumes the previous step's output.
pub fn step_records(layout: &SubjectLayout, dummy_volumes: usize) -> Vec<StepRecord> {
    let cleaning = StepRecord {
        step: Step::Cleaning,
        input: layout.raw(),
        output: layout.cleaned(),
        operation: Operation::CleanAndTrim {
            dummy_volumes,
            bvals_in: layout.raw_bvals(),
            bvals_out: layout.cleaned_bvals(),
        },
    };
    let mppca = StepRecord {
        step: Step::Mppca,
        input: cleaning.output.clone(),
        output: layout.denoised(),
        operation: Operation::Denoise {
            noise_map: layout.noise_sigma(),
            extent: DENOISE_EXTENT,
            force: true,
        },
    };
    let gibbs = StepRecord {
        step: Step::Gibbs,
        input: mppca.output.clone(),
        output: layout.unringed(),
        operation: Operation::Unring,
    };
    let topup = StepRecord {
        step: Step::Topup,
        input: gibbs.output.clone(),
        output: layout.distortion_corrected(),
        operation: Operation::DistortionCorrect {
            reverse_pe: layout.reverse_pe(),
            work_dir: layout.topup_work_dir(),
        },
    };
    let motion = StepRecord {
        step: Step::MotionCorrection,
        input: topup.output.clone(),
        output: layout.motion_corrected(),
        operation: Operation::MotionCorrect {
            output_prefix: layout.motion_corrected_prefix(),
        },
    };
    let adc = StepRecord {
        step: Step::Adc,
        input: motion.output.clone(),
        output: layout.adc(),
        operation: Operation::FitCoefficient {
            bvals: layout.cleaned_bvals(),
        },
    };

    vec![cleaning, mppca, gibbs, topup, motion, adc]
}

/// Where a step writes before its output is moved into place.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".partial-");
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    path.with_file_name(name)
}

#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub record: StepRecord,
    pub will_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectOutcome {
    pub subject: String,
    pub executed: Vec<Step>,
    pub skipped: Vec<Step>,
}

pub struct SubjectPipeline<'a> {
    layout: SubjectLayout,
    dummy_volumes: usize,
    requested: &'a StepSelection,
}

impl<'a> SubjectPipeline<'a> {
    pub fn new(config: &'a PipelineConfig, subject: &str, dummy_volumes: usize) -> Self {
        Self {
            layout: SubjectLayout::new(config.data_directory(), subject),
            dummy_volumes,
            requested: config.steps(),
        }
    }

    pub fn layout(&self) -> &SubjectLayout {
        &self.layout
    }

    pub fn records(&self) -> Vec<StepRecord> {
        step_records(&self.layout, self.dummy_volumes)
    }

    /// What `run` would do right now, without doing it.
    pub fn plan(&self) -> Vec<PlannedStep> {
        self.records()
            .into_iter()
            .map(|record| PlannedStep {
                will_run: should_run(record.step, &record.output, self.requested),
                record,
            })
            .collect()
    }

    /// Run every step that needs running, stopping at the first failure.
    pub fn run(&self, ops: &dyn ExternalOps) -> Result<SubjectOutcome, SubjectFailure> {
        let subject = self.layout.subject();
        let mut outcome = SubjectOutcome {
            subject: subject.to_string(),
            executed: Vec::new(),
            skipped: Vec::new(),
        };

        for record in self.records() {
            if !should_run(record.step, &record.output, self.requested) {
                debug!(subject, step = %record.step, output = %record.output.display(), "output exists, skipping");
                outcome.skipped.push(record.step);
                continue;
            }

            info!(
                subject,
                step = %record.step,
                inputs = %display_paths(&record.required_inputs()),
                output = %record.output.display(),
                "{}",
                banner(record.step)
            );
            self.execute(&record, ops).map_err(|error| SubjectFailure {
                subject: subject.to_string(),
                step: Some(record.step),
                error,
            })?;
            outcome.executed.push(record.step);
        }

        Ok(outcome)
    }

    fn execute(&self, record: &StepRecord, ops: &dyn ExternalOps) -> PipelineResult<()> {
        if let Some(missing) = record.required_inputs().into_iter().find(|p| !p.exists()) {
            return Err(PipelineError::Path(missing.to_path_buf()));
        }

        let outputs: Vec<&Path> = std::iter::once(record.output.as_path())
            .chain(record.aux_outputs())
            .collect();
        for output in &outputs {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let staged: Vec<PathBuf> = outputs.iter().map(|p| partial_path(p)).collect();

        let result = Self::dispatch(record, &staged[0], ops)
            .and_then(|()| Self::promote(&staged, &outputs));
        if result.is_err() {
            for path in &staged {
                // Nothing to clean up if the step never created it.
                let _ = fs::remove_file(path);
            }
        }
        result
    }

    /// Move staged files onto their final paths. The main output goes last, so
    /// it only appears once its siblings are in place.
    fn promote(staged: &[PathBuf], outputs: &[&Path]) -> PipelineResult<()> {
        if !staged[0].exists() {
            return Err(PipelineError::Path(staged[0].clone()));
        }
        for (from, to) in staged.iter().zip(outputs).skip(1) {
            if from.exists() {
                fs::rename(from, to)?;
            }
        }
        fs::rename(&staged[0], outputs[0])?;
        Ok(())
    }

    fn dispatch(record: &StepRecord, staged: &Path, ops: &dyn ExternalOps) -> PipelineResult<()> {
        let input = record.input.as_path();
        match &record.operation {
            Operation::CleanAndTrim {
                dummy_volumes,
                bvals_in,
                bvals_out,
            } => ops.clean_and_trim(input, staged, *dummy_volumes, bvals_in, &partial_path(bvals_out)),
            Operation::Denoise {
                noise_map,
                extent,
                force,
            } => ops.denoise(input, staged, &partial_path(noise_map), *extent, *force),
            Operation::Unring => ops.unring(input, staged),
            Operation::DistortionCorrect {
                reverse_pe,
                work_dir,
            } => ops.distortion_correct(input, reverse_pe, work_dir, staged),
            Operation::MotionCorrect { output_prefix } => {
                ops.motion_correct(input, &partial_path(output_prefix))
            }
            Operation::FitCoefficient { bvals } => ops.fit_coefficient(input, bvals, staged),
        }
    }
}

fn banner(step: Step) -> String {
    let rule = "*".repeat(24);
    format!("{rule} {} {rule}", step.label())
}

fn display_paths(paths: &[&Path]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
