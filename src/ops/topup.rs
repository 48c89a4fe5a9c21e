//! Susceptibility distortion correction with FSL topup/applytopup.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Axis, stack};

use crate::config::ToolPaths;
use crate::error::PipelineResult;
use crate::ops::command::ToolCommand;
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};

/// Auxiliary field-map artifacts, kept under the subject's working directory.
pub struct TopupFiles {
    pub b0_pair: PathBuf,
    pub acqparams: PathBuf,
    pub results: PathBuf,
    pub unwarped_b0: PathBuf,
}

impl TopupFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            b0_pair: dir.join("b0_pair.nii.gz"),
            acqparams: dir.join("acqparams.txt"),
            results: dir.join("topup_results"),
            unwarped_b0: dir.join("b0_unwarped.nii.gz"),
        }
    }
}

/// Acquisition parameters for a phase-encode pair along y (AP then PA).
pub fn acqparams(readout_time: f64) -> String {
    format!("0 1 0 {readout_time}\n0 -1 0 {readout_time}\n")
}

/// Stack the first frame of `input` and of `reverse_pe` into a two-frame volume.
pub fn write_b0_pair(input: &Path, reverse_pe: &Path, b0_pair: &Path) -> PipelineResult<()> {
    let forward = VolumeLoader::load(input)?;
    let reverse = VolumeLoader::load(reverse_pe)?;

    let forward_b0 = forward.frame(0).ok_or(VolumeLoaderError::UnsupportedDimensions(forward.ndim()))?;
    let reverse_b0 = reverse.frame(0).ok_or(VolumeLoaderError::UnsupportedDimensions(reverse.ndim()))?;
    if forward_b0.shape() != reverse_b0.shape() {
        return Err(VolumeLoaderError::ShapeMismatch {
            path: reverse_pe.to_path_buf(),
            expected: forward_b0.shape().to_vec(),
            found: reverse_b0.shape().to_vec(),
        }
        .into());
    }

    let pair = stack(Axis(3), &[forward_b0, reverse_b0])
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    VolumeLoader::save(&pair, b0_pair, &forward.affine, forward.header.as_ref())?;
    Ok(())
}

/// Estimate the field from the b0 pair, then unwarp `input` into `output`.
pub fn distortion_correct(
    tools: &ToolPaths,
    readout_time: f64,
    input: &Path,
    reverse_pe: &Path,
    work_dir: &Path,
    output: &Path,
) -> PipelineResult<()> {
    fs::create_dir_all(work_dir)?;
    let files = TopupFiles::in_dir(work_dir);

    write_b0_pair(input, reverse_pe, &files.b0_pair)?;
    fs::write(&files.acqparams, acqparams(readout_time))?;

    ToolCommand::new(&tools.topup)
        .option("imain", &files.b0_pair)
        .option("datain", &files.acqparams)
        .option("config", &tools.topup_config)
        .option("out", &files.results)
        .option("iout", &files.unwarped_b0)
        .run()?;

    ToolCommand::new(&tools.applytopup)
        .option("imain", input)
        .option("inindex", "1")
        .option("datain", &files.acqparams)
        .option("topup", &files.results)
        .option("method", "jac")
        .option("out", output)
        .run()
}
