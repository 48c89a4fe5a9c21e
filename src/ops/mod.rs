//! The image transformations the pipeline drives.
//!
//! The pipeline only knows the [`ExternalOps`] contract: paths in, paths out,
//! an error on failure. [`ToolchainOps`] is the production implementation,
//! delegating to MRtrix3, FSL and ANTs executables, with cleaning and the
//! ADC fit done in-process.

pub mod adc;
pub mod cleaning;
pub mod command;
pub mod topup;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{PipelineConfig, ToolPaths};
use crate::error::PipelineResult;
use command::ToolCommand;

/// Every method writes its result to the given output path(s) and nothing else
/// the pipeline tracks.
pub trait ExternalOps: Send + Sync {
    /// Remove the first `dummy_volumes` frames and outlier frames.
    ///
    /// `bvals_in` may be absent. `bvals_out` is written only when the
    /// implementation knows the series' b-values.
    fn clean_and_trim(
        &self,
        input: &Path,
        output: &Path,
        dummy_volumes: usize,
        bvals_in: &Path,
        bvals_out: &Path,
    ) -> PipelineResult<()>;

    fn denoise(
        &self,
        input: &Path,
        output: &Path,
        noise_map: &Path,
        extent: u32,
        force: bool,
    ) -> PipelineResult<()>;

    fn unring(&self, input: &Path, output: &Path) -> PipelineResult<()>;

    /// Field-map intermediates go under `work_dir`.
    fn distortion_correct(
        &self,
        input: &Path,
        reverse_pe: &Path,
        work_dir: &Path,
        output: &Path,
    ) -> PipelineResult<()>;

    /// Writes `<output_prefix>.nii.gz`.
    fn motion_correct(&self, input: &Path, output_prefix: &Path) -> PipelineResult<()>;

    /// `bvals` is where cleaning leaves the b-values of the series; it may be absent.
    fn fit_coefficient(&self, input: &Path, bvals: &Path, output: &Path) -> PipelineResult<()>;
}

pub struct ToolchainOps {
    tools: ToolPaths,
    readout_time: f64,
    outlier_threshold: f64,
    bvals: Option<Vec<f64>>,
}

impl ToolchainOps {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            tools: config.tools().clone(),
            readout_time: config.readout_time(),
            outlier_threshold: config.outlier_threshold(),
            bvals: config.bvals().map(<[f64]>::to_vec),
        }
    }
}

/// `prefix` + `suffix` without touching dots already in the file name.
pub(crate) fn with_name_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

impl ExternalOps for ToolchainOps {
    fn clean_and_trim(
        &self,
        input: &Path,
        output: &Path,
        dummy_volumes: usize,
        bvals_in: &Path,
        bvals_out: &Path,
    ) -> PipelineResult<()> {
        cleaning::clean_and_trim(
            input,
            output,
            dummy_volumes,
            self.outlier_threshold,
            bvals_in,
            self.bvals.as_deref(),
            bvals_out,
        )
        .map(|_| ())
    }

    fn denoise(
        &self,
        input: &Path,
        output: &Path,
        noise_map: &Path,
        extent: u32,
        force: bool,
    ) -> PipelineResult<()> {
        let mut command = ToolCommand::new(&self.tools.dwidenoise)
            .arg(input)
            .arg(output)
            .arg("-noise")
            .arg(noise_map)
            .arg("-extent")
            .arg(extent.to_string());
        if force {
            command = command.arg("-force");
        }
        command.run()
    }

    fn unring(&self, input: &Path, output: &Path) -> PipelineResult<()> {
        ToolCommand::new(&self.tools.mrdegibbs)
            .arg(input)
            .arg(output)
            .run()
    }

    fn distortion_correct(
        &self,
        input: &Path,
        reverse_pe: &Path,
        work_dir: &Path,
        output: &Path,
    ) -> PipelineResult<()> {
        topup::distortion_correct(&self.tools, self.readout_time, input, reverse_pe, work_dir, output)
    }

    fn motion_correct(&self, input: &Path, output_prefix: &Path) -> PipelineResult<()> {
        let average = with_name_suffix(output_prefix, "_avg.nii.gz");
        let corrected = with_name_suffix(output_prefix, ".nii.gz");

        ToolCommand::new(&self.tools.ants_motion_corr)
            .arg("-d")
            .arg("3")
            .arg("-a")
            .arg(input)
            .arg("-o")
            .arg(&average)
            .run()?;

        let mut outputs = OsString::from("[");
        for (i, part) in [output_prefix, corrected.as_path(), average.as_path()].iter().enumerate() {
            if i > 0 {
                outputs.push(",");
            }
            outputs.push(part.as_os_str());
        }
        outputs.push("]");

        let mut metric = OsString::from("MI[");
        metric.push(average.as_os_str());
        metric.push(",");
        metric.push(input.as_os_str());
        metric.push(",1,32,Regular,0.2]");

        ToolCommand::new(&self.tools.ants_motion_corr)
            .arg("-d")
            .arg("3")
            .arg("-o")
            .arg(outputs)
            .arg("-m")
            .arg(metric)
            .arg("-t")
            .arg("Rigid[0.1]")
            .arg("-u")
            .arg("1")
            .arg("-e")
            .arg("1")
            .arg("-s")
            .arg("1x0")
            .arg("-f")
            .arg("2x1")
            .arg("-i")
            .arg("20x5")
            .arg("-n")
            .arg("5")
            .arg("-w")
            .arg("1")
            .run()?;

        // The average is only the registration target.
        if average.exists() {
            fs::remove_file(&average)?;
        }
        Ok(())
    }

    fn fit_coefficient(&self, input: &Path, bvals: &Path, output: &Path) -> PipelineResult<()> {
        adc::fit_coefficient(input, bvals, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::volume::IDENTITY_AFFINE;
    use crate::volume_loader::VolumeLoader;
    use approx::assert_relative_eq;
    use ndarray::Array4;
    use tempfile::TempDir;

    #[test]
    fn configured_bvals_carry_cleaning_through_to_adc() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let json = serde_json::json!({
            "data_directory": dir.path(),
            "subject_names": ["S1"],
            "nb_dummies": [1],
            "bvals": [0, 200, 200, 1000, 1000],
        });
        let ops = ToolchainOps::new(&PipelineConfig::from_json(&json.to_string()).unwrap());

        let bvals: [f64; 5] = [0.0, 200.0, 200.0, 1000.0, 1000.0];
        let raw = dir.path().join("raw.nii.gz");
        let data = Array4::<f32>::from_shape_fn((2, 2, 1, 5), |(_, _, _, t)| {
            (1000.0 * (-bvals[t] * 0.7e-3).exp()) as f32
        });
        VolumeLoader::save(&data, &raw, &IDENTITY_AFFINE, None).unwrap();

        let cleaned = dir.path().join("clean.nii.gz");
        let cleaned_bvals = dir.path().join("clean.bval");
        let adc = dir.path().join("adc.nii.gz");
        ops.clean_and_trim(&raw, &cleaned, 1, &dir.path().join("raw.bval"), &cleaned_bvals)
            .unwrap();
        ops.fit_coefficient(&cleaned, &cleaned_bvals, &adc).unwrap();

        let map = VolumeLoader::load(&adc).unwrap();
        assert_eq!(map.shape(), &[2, 2, 1]);
        for value in map.data.iter() {
            assert_relative_eq!(*value, 0.7e-3, epsilon = 1e-7);
        }
    }

    #[test]
    fn name_suffix_keeps_dots_in_subject_names() {
        let prefix = Path::new("/d/sub.01/ANTS/sub.01-dwi-200-1000_mc");
        assert_eq!(
            with_name_suffix(prefix, ".nii.gz"),
            PathBuf::from("/d/sub.01/ANTS/sub.01-dwi-200-1000_mc.nii.gz")
        );
    }
}
