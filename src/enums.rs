use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Processing steps of the DWI pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Cleaning,
    Mppca,
    Gibbs,
    Topup,
    MotionCorrection,
    Adc,
}

impl Step {
    pub const ORDERED: [Step; 6] = [
        Step::Cleaning,
        Step::Mppca,
        Step::Gibbs,
        Step::Topup,
        Step::MotionCorrection,
        Step::Adc,
    ];

    /// Name used in configuration files and log output.
    pub fn name(self) -> &'static str {
        match self {
            Step::Cleaning => "cleaning",
            Step::Mppca => "mppca",
            Step::Gibbs => "gibbs",
            Step::Topup => "topup",
            Step::MotionCorrection => "MC",
            Step::Adc => "adc",
        }
    }

    /// Human-readable label for step banners.
    pub fn label(self) -> &'static str {
        match self {
            Step::Cleaning => "Cleaning",
            Step::Mppca => "MPPCA denoising",
            Step::Gibbs => "Gibbs unringing",
            Step::Topup => "Topup",
            Step::MotionCorrection => "Motion correction",
            Step::Adc => "ADC",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown step '{0}' (expected one of cleaning, mppca, gibbs, topup, MC, adc, all)")]
pub struct UnknownStep(pub String);

/// A single entry of `steps_to_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepRequest {
    Only(Step),
    All,
}

impl FromStr for StepRequest {
    type Err = UnknownStep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(StepRequest::All);
        }
        Step::ORDERED
            .into_iter()
            .find(|step| step.name() == s)
            .map(StepRequest::Only)
            .ok_or_else(|| UnknownStep(s.to_string()))
    }
}

/// Slice orientation for volume overviews.
///
/// Volumes follow the NIfTI (x, y, z) index order, so `Axial` walks the z axis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    /// Spatial axis the slices are taken along.
    pub fn axis(self) -> usize {
        match self {
            Orientation::Sagittal => 0,
            Orientation::Coronal => 1,
            Orientation::Axial => 2,
        }
    }
}
