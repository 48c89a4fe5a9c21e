//! Per-subject file layout.
//!
//! These names are shared with earlier runs: a step is considered done when its
//! file exists at exactly this path, so the templates must not change.

use std::path::{Path, PathBuf};

use crate::ops::with_name_suffix;

pub const NIFTI_SUFFIX: &str = ".nii.gz";
/// Acquisition tag shared by every DWI file name.
const ACQUISITION: &str = "dwi-200-1000";

pub const TOPUP_DIR: &str = "preprocessed/topup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectLayout {
    subject: String,
    root: PathBuf,
}

impl SubjectLayout {
    pub fn new(data_directory: &Path, subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            root: data_directory.join(subject),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The subject's working directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, dir: &str, suffix: &str) -> PathBuf {
        self.root
            .join(dir)
            .join(format!("{}-{ACQUISITION}{suffix}", self.subject))
    }

    pub fn raw(&self) -> PathBuf {
        self.file("dwi", NIFTI_SUFFIX)
    }

    pub fn raw_bvals(&self) -> PathBuf {
        self.file("dwi", ".bval")
    }

    pub fn reverse_pe(&self) -> PathBuf {
        self.file("dwi", "-revPE.nii.gz")
    }

    pub fn cleaned(&self) -> PathBuf {
        self.file("preprocessed/wo_outliers", "_clean.nii.gz")
    }

    pub fn cleaned_bvals(&self) -> PathBuf {
        self.file("preprocessed/wo_outliers", "_clean.bval")
    }

    pub fn denoised(&self) -> PathBuf {
        self.file("preprocessed/denoised", "_denoised.nii.gz")
    }

    pub fn noise_sigma(&self) -> PathBuf {
        self.file("preprocessed/denoised", "_denoised_sigma.nii.gz")
    }

    pub fn unringed(&self) -> PathBuf {
        self.file("preprocessed/unringed", "_denoised_unringed.nii.gz")
    }

    pub fn distortion_corrected(&self) -> PathBuf {
        self.file(TOPUP_DIR, "_denoised_unringed_sdc.nii.gz")
    }

    pub fn topup_work_dir(&self) -> PathBuf {
        self.root.join(TOPUP_DIR)
    }

    /// Motion-correction output without extension; the tool appends it.
    pub fn motion_corrected_prefix(&self) -> PathBuf {
        self.file("preprocessed/ANTS", "_denoised_unringed_sdc_mc")
    }

    pub fn motion_corrected(&self) -> PathBuf {
        with_name_suffix(&self.motion_corrected_prefix(), NIFTI_SUFFIX)
    }

    pub fn adc(&self) -> PathBuf {
        self.root
            .join("preprocessed/adc")
            .join(format!("{}-adc.nii.gz", self.subject))
    }
}
