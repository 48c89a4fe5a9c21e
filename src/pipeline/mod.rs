//! Resumable per-subject orchestration.
//!
//! Steps communicate only through files. A step is skipped when its output
//! already exists, unless the operator names it (or `all`) in `steps_to_run`.

pub mod layout;
pub mod planner;
pub mod runner;
pub mod subject;

pub use planner::{StepSelection, should_run};
pub use runner::{PARTIAL_FAILURE, PipelineRunner, RunReport, SubjectPlan};
pub use subject::{StepRecord, SubjectOutcome, SubjectPipeline};
