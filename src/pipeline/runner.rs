use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::SubjectFailure;
use crate::ops::ExternalOps;
use crate::pipeline::subject::{PlannedStep, SubjectOutcome, SubjectPipeline};

/// Process exit status when at least one subject failed.
pub const PARTIAL_FAILURE: u8 = 2;

#[derive(Debug, Default)]
pub struct RunReport {
    pub succeeded: Vec<SubjectOutcome>,
    pub failed: Vec<SubjectFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// `0` when every subject finished, [`PARTIAL_FAILURE`] otherwise.
    pub fn exit_status(&self) -> u8 {
        if self.is_success() { 0 } else { PARTIAL_FAILURE }
    }

    pub fn log_summary(&self) {
        info!(
            succeeded = self.succeeded.len(),
            failed = self.failed.len(),
            "pipeline finished"
        );
        for outcome in &self.succeeded {
            info!(
                subject = %outcome.subject,
                executed = ?outcome.executed,
                skipped = ?outcome.skipped,
                "subject complete"
            );
        }
        for failure in &self.failed {
            warn!(subject = %failure.subject, step = ?failure.step, "{}", failure);
        }
    }
}

#[derive(Debug)]
pub struct SubjectPlan {
    pub subject: String,
    pub steps: Vec<PlannedStep>,
}

/// Drives every configured subject through the pipeline.
pub struct PipelineRunner<O> {
    config: PipelineConfig,
    ops: O,
}

impl<O: ExternalOps> PipelineRunner<O> {
    pub fn new(config: PipelineConfig, ops: O) -> Self {
        Self { config, ops }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Dry run: which steps each subject would execute now.
    pub fn plan(&self) -> Vec<SubjectPlan> {
        self.config
            .subjects()
            .map(|(subject, dummies)| SubjectPlan {
                subject: subject.to_string(),
                steps: SubjectPipeline::new(&self.config, subject, dummies).plan(),
            })
            .collect()
    }

    /// Process all subjects. A failing subject is recorded and the batch continues.
    ///
    /// Subjects run on the rayon pool when the configuration asks for it; the
    /// report keeps configuration order either way.
    pub fn run(&self) -> RunReport {
        let subjects: Vec<(&str, usize)> = self.config.subjects().collect();
        info!(
            subjects = subjects.len(),
            parallel = self.config.parallel(),
            "starting pipeline"
        );

        let results: Vec<Result<SubjectOutcome, SubjectFailure>> = if self.config.parallel() {
            subjects
                .par_iter()
                .map(|&(subject, dummies)| self.run_subject(subject, dummies))
                .collect()
        } else {
            subjects
                .iter()
                .map(|&(subject, dummies)| self.run_subject(subject, dummies))
                .collect()
        };

        let mut report = RunReport::default();
        for result in results {
            match result {
                Ok(outcome) => report.succeeded.push(outcome),
                Err(failure) => report.failed.push(failure),
            }
        }
        report
    }

    fn run_subject(&self, subject: &str, dummies: usize) -> Result<SubjectOutcome, SubjectFailure> {
        info!(subject, dummies, "processing subject");
        let result = SubjectPipeline::new(&self.config, subject, dummies).run(&self.ops);
        if let Err(failure) = &result {
            error!(subject, step = ?failure.step, error = %failure.error, "subject failed");
        }
        result
    }
}
