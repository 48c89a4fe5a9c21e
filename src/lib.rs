//! # dwi-prep
//!
//! Resumable preprocessing for diffusion-weighted MRI (DWI) studies.
//!
//! Every subject goes through the same fixed chain of steps:
//!  - `cleaning`: drop leading dummy volumes and outlier frames
//!  - `mppca`: MP-PCA denoising (MRtrix3 `dwidenoise`)
//!  - `gibbs`: Gibbs unringing (MRtrix3 `mrdegibbs`)
//!  - `topup`: susceptibility distortion correction (FSL `topup`/`applytopup`)
//!  - `MC`: motion correction (ANTs `antsMotionCorr`)
//!  - `adc`: apparent diffusion coefficient fit
//!
//! Each step reads the previous step's file and writes its own, under a fixed
//! per-subject layout. A step whose output already exists is skipped, so an
//! interrupted batch resumes where it stopped; naming a step (or `all`) in
//! `steps_to_run` forces it to run again. Outputs are written to a hidden
//! `.partial-` sibling and moved into place only when the step succeeds.
//!
//! A failing subject does not stop the batch. The [`RunReport`] lists which
//! subjects completed and where the others failed.
//!
//! The crate also carries the small volume helpers used to inspect results:
//! NIfTI load/save with affine handling ([`VolumeLoader`]), temporal
//! mean/std/tSNR maps ([`stats`]) and slice overview images ([`montage`]).
//!
//! # Examples
//!
//! ## Running a study
//!
//! ```no_run
//! # use dwi_prep::{PipelineConfig, PipelineRunner, ToolchainOps};
//! let config = PipelineConfig::from_file("args.json").expect("should have loaded config");
//! let ops = ToolchainOps::new(&config);
//! let report = PipelineRunner::new(config, ops).run();
//! report.log_summary();
//! ```
//!
//! ## Temporal SNR of a 4D volume
//!
//! ```no_run
//! # use dwi_prep::{VolumeLoader, stats};
//! let volume = VolumeLoader::load("S1/dwi/S1-dwi-200-1000.nii.gz")
//!     .expect("should have loaded volume");
//! let series = stats::as_timeseries(&volume).expect("should be 4D");
//! let tsnr = stats::temporal_snr(series, 2.0).expect("should have frames");
//! VolumeLoader::save(&tsnr, "tsnr.nii.gz", &volume.affine, None)
//!     .expect("should have saved map");
//! ```

pub mod config;
pub mod enums;
pub mod error;
pub mod montage;
pub mod ops;
pub mod pipeline;
pub mod stats;
pub mod volume;
pub mod volume_loader;

pub use config::{ConfigFile, PipelineConfig, ToolPaths};
pub use enums::{Orientation, Step};
pub use error::{PipelineError, PipelineResult, SubjectFailure};
pub use ops::{ExternalOps, ToolchainOps};
pub use pipeline::{PipelineRunner, RunReport, StepSelection};
pub use volume::{Affine, IDENTITY_AFFINE, Volume};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
