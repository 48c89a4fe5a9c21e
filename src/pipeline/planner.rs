use std::collections::BTreeSet;
use std::path::Path;

use crate::enums::{Step, StepRequest, UnknownStep};

/// Steps the operator asked to recompute, regardless of existing outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSelection {
    all: bool,
    steps: BTreeSet<Step>,
}

impl StepSelection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            all: true,
            steps: BTreeSet::new(),
        }
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, UnknownStep>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| name.as_ref().parse::<StepRequest>())
            .collect()
    }

    /// True when `step` is named explicitly or via `all`.
    pub fn contains(&self, step: Step) -> bool {
        self.all || self.steps.contains(&step)
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.steps.is_empty()
    }
}

impl FromIterator<StepRequest> for StepSelection {
    fn from_iter<T: IntoIterator<Item = StepRequest>>(iter: T) -> Self {
        let mut selection = Self::default();
        for request in iter {
            match request {
                StepRequest::All => selection.all = true,
                StepRequest::Only(step) => {
                    selection.steps.insert(step);
                }
            }
        }
        selection
    }
}

/// Whether a step has to (re)run.
///
/// A step runs when its output is absent, or when the operator requested it
/// by name or via `all`. An unreadable parent directory counts as absent.
pub fn should_run(step: Step, output: &Path, requested: &StepSelection) -> bool {
    !output.exists() || requested.contains(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn existing_output(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("out.nii.gz");
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn existing_output_is_skipped_unless_requested() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let output = existing_output(&dir);
        let requested = StepSelection::from_names(["gibbs", "adc"]).unwrap();

        for step in Step::ORDERED {
            let expected = matches!(step, Step::Gibbs | Step::Adc);
            assert_eq!(should_run(step, &output, &requested), expected, "{step}");
        }
        assert!(!should_run(Step::Cleaning, &output, &StepSelection::none()));
    }

    #[test]
    fn missing_output_always_runs() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let output = dir.path().join("missing/out.nii.gz");

        for step in Step::ORDERED {
            assert!(should_run(step, &output, &StepSelection::none()));
            assert!(should_run(step, &output, &StepSelection::all()));
        }
    }

    #[test]
    fn all_forces_every_step() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let output = existing_output(&dir);
        let requested = StepSelection::from_names(["cleaning", "all"]).unwrap();

        assert!(Step::ORDERED.iter().all(|&s| should_run(s, &output, &requested)));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = StepSelection::from_names(["mppca", "eddy"]).unwrap_err();
        assert_eq!(err, UnknownStep("eddy".into()));
    }
}
