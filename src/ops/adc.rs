//! Apparent diffusion coefficient from a multi-b-value series.

use std::path::Path;

use ndarray::{Array3, ArrayView4, Axis, Zip};

use crate::error::{PipelineError, PipelineResult};
use crate::stats::as_timeseries;
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};

/// Fit `ln S = ln S0 - b * ADC` per voxel by least squares and save the ADC map.
///
/// `bvals_path` is the sidecar cleaning wrote for this series. Without it the
/// frames cannot be assigned b-values and the fit fails with
/// [`PipelineError::MissingBValues`].
pub fn fit_coefficient(input: &Path, bvals_path: &Path, output: &Path) -> PipelineResult<()> {
    if !bvals_path.is_file() {
        return Err(PipelineError::MissingBValues(input.to_path_buf()));
    }
    let volume = VolumeLoader::load(input)?;
    let series = as_timeseries(&volume)?;
    let bvals = VolumeLoader::read_bvals(bvals_path)?;

    let frames = series.len_of(Axis(3));
    if bvals.len() != frames {
        return Err(VolumeLoaderError::InvalidSidecar {
            path: bvals_path.to_path_buf(),
            reason: format!("{} entries for {} frames", bvals.len(), frames),
        }
        .into());
    }

    let adc = fit_adc(series, &bvals);
    VolumeLoader::save(&adc, output, &volume.affine, None)?;
    Ok(())
}

/// Voxels with a non-positive sample, or a series without b-value spread, map to 0.
pub fn fit_adc(series: ArrayView4<'_, f32>, bvals: &[f64]) -> Array3<f32> {
    let n = bvals.len() as f64;
    let b_mean = bvals.iter().sum::<f64>() / n.max(1.0);
    let sxx: f64 = bvals.iter().map(|b| (b - b_mean).powi(2)).sum();

    let (nx, ny, nz, _) = series.dim();
    let mut adc = Array3::<f32>::zeros((nx, ny, nz));
    if sxx <= 0.0 {
        return adc;
    }

    Zip::from(&mut adc)
        .and(series.lanes(Axis(3)))
        .par_for_each(|out, signal| {
            if signal.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
                return;
            }
            let logs: Vec<f64> = signal.iter().map(|&s| (s as f64).ln()).collect();
            let y_mean = logs.iter().sum::<f64>() / n;
            let sxy: f64 = bvals
                .iter()
                .zip(&logs)
                .map(|(b, y)| (b - b_mean) * (y - y_mean))
                .sum();
            *out = (-sxy / sxx) as f32;
        });

    adc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::IDENTITY_AFFINE;
    use approx::assert_relative_eq;
    use ndarray::Array4;
    use tempfile::TempDir;

    fn mono_exponential(adc: f64, bvals: &[f64]) -> Array4<f32> {
        Array4::from_shape_fn((2, 2, 1, bvals.len()), |(_, _, _, t)| {
            (1000.0 * (-bvals[t] * adc).exp()) as f32
        })
    }

    #[test]
    fn recovers_known_coefficient() {
        let bvals = [200.0, 200.0, 1000.0, 1000.0];
        let series = mono_exponential(0.8e-3, &bvals);

        let adc = fit_adc(series.view(), &bvals);

        for value in adc.iter() {
            assert_relative_eq!(*value, 0.8e-3, epsilon = 1e-7);
        }
    }

    #[test]
    fn non_positive_signal_and_single_shell_give_zero() {
        let bvals = [200.0, 1000.0];
        let mut series = mono_exponential(1e-3, &bvals);
        series[[0, 0, 0, 1]] = 0.0;

        let adc = fit_adc(series.view(), &bvals);
        assert_eq!(adc[[0, 0, 0]], 0.0);
        assert!(adc[[1, 1, 0]] > 0.0);

        let flat = fit_adc(series.view(), &[1000.0, 1000.0]);
        assert!(flat.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn frame_count_must_match_bvals() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let input = dir.path().join("mc.nii.gz");
        let bvals = dir.path().join("clean.bval");
        VolumeLoader::save(&mono_exponential(1e-3, &[200.0, 1000.0]), &input, &IDENTITY_AFFINE, None)
            .unwrap();
        VolumeLoader::write_bvals(&bvals, &[200.0, 1000.0, 1000.0]).unwrap();

        let err = fit_coefficient(&input, &bvals, &dir.path().join("adc.nii.gz")).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Format(VolumeLoaderError::InvalidSidecar { .. })
        ));
    }

    #[test]
    fn missing_sidecar_is_reported_as_missing_bvalues() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let input = dir.path().join("mc.nii.gz");
        VolumeLoader::save(&mono_exponential(1e-3, &[200.0, 1000.0]), &input, &IDENTITY_AFFINE, None)
            .unwrap();
        let output = dir.path().join("adc.nii.gz");

        let err = fit_coefficient(&input, &dir.path().join("clean.bval"), &output).unwrap_err();

        assert!(matches!(err, PipelineError::MissingBValues(p) if p == input));
        assert!(!output.exists());
    }
}
