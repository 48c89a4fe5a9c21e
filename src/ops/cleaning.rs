//! Dummy-volume removal and outlier-frame rejection.

use std::path::Path;

use ndarray::{ArrayView4, Axis};
use tracing::{debug, info, warn};

use crate::error::PipelineResult;
use crate::stats::{StatsError, as_timeseries};
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};

/// Scales the median absolute deviation to a normal standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleaningSummary {
    pub input_frames: usize,
    pub dummies: usize,
    pub outliers: Vec<usize>,
}

impl CleaningSummary {
    pub fn kept(&self) -> usize {
        self.input_frames - self.dummies - self.outliers.len()
    }
}

/// Drop the first `dummy_volumes` frames, then frames whose mean signal is an
/// outlier within its b-value shell.
///
/// b-values come from `bvals_in` when that sidecar exists, else from
/// `configured_bvals`. When either is known, the kept entries are written to
/// `bvals_out`. Without b-values the shells cannot be told apart, so only the
/// dummies are removed. Outlier indices in the summary refer to the trimmed
/// series.
pub fn clean_and_trim(
    input: &Path,
    output: &Path,
    dummy_volumes: usize,
    outlier_threshold: f64,
    bvals_in: &Path,
    configured_bvals: Option<&[f64]>,
    bvals_out: &Path,
) -> PipelineResult<CleaningSummary> {
    let volume = VolumeLoader::load(input)?;
    let series = as_timeseries(&volume)?;
    let input_frames = series.len_of(Axis(3));

    if dummy_volumes >= input_frames {
        return Err(StatsError::EmptyTimeAxis.into());
    }

    let bvals = if bvals_in.is_file() {
        let bvals = VolumeLoader::read_bvals(bvals_in)?;
        if bvals.len() != input_frames {
            return Err(VolumeLoaderError::InvalidSidecar {
                path: bvals_in.to_path_buf(),
                reason: format!("{} entries for {} frames", bvals.len(), input_frames),
            }
            .into());
        }
        Some(bvals)
    } else if let Some(bvals) = configured_bvals {
        if bvals.len() != input_frames {
            return Err(VolumeLoaderError::ShapeMismatch {
                path: input.to_path_buf(),
                expected: vec![bvals.len()],
                found: vec![input_frames],
            }
            .into());
        }
        Some(bvals.to_vec())
    } else {
        None
    };
    let bvals = bvals.map(|b| b[dummy_volumes..].to_vec());

    let trimmed = series.slice_axis(Axis(3), (dummy_volumes..).into());
    let outliers = match &bvals {
        Some(b) => {
            let shells: Vec<i64> = b.iter().map(|v| v.round() as i64).collect();
            outlier_frames(&frame_means(trimmed), &shells, outlier_threshold)
        }
        None => {
            debug!(input = %input.display(), "no b-values, skipping outlier rejection");
            Vec::new()
        }
    };
    let kept: Vec<usize> = (0..trimmed.len_of(Axis(3)))
        .filter(|t| !outliers.contains(t))
        .collect();

    if !outliers.is_empty() {
        warn!(input = %input.display(), ?outliers, "dropping outlier frames");
    }

    let cleaned = trimmed.select(Axis(3), &kept);
    VolumeLoader::save(&cleaned, output, &volume.affine, volume.header.as_ref())?;

    if let Some(bvals) = bvals {
        let kept_bvals: Vec<f64> = kept.iter().map(|&t| bvals[t]).collect();
        VolumeLoader::write_bvals(bvals_out, &kept_bvals)?;
    }

    let summary = CleaningSummary {
        input_frames,
        dummies: dummy_volumes,
        outliers,
    };
    info!(
        input_frames,
        dummies = dummy_volumes,
        kept = summary.kept(),
        "cleaned time series"
    );
    Ok(summary)
}

/// Whole-volume mean signal of every frame.
pub fn frame_means(series: ArrayView4<'_, f32>) -> Vec<f64> {
    series
        .axis_iter(Axis(3))
        .map(|frame| frame.iter().map(|&v| v as f64).sum::<f64>() / frame.len().max(1) as f64)
        .collect()
}

/// Frames whose robust z-score within their shell exceeds `threshold`.
///
/// The z-score uses the shell median and 1.4826 * MAD. Shells with zero MAD
/// produce no outliers.
pub fn outlier_frames(means: &[f64], shells: &[i64], threshold: f64) -> Vec<usize> {
    let mut keys: Vec<i64> = shells.to_vec();
    keys.sort_unstable();
    keys.dedup();

    let mut outliers = Vec::new();
    for key in keys {
        let members: Vec<usize> = (0..means.len()).filter(|&t| shells[t] == key).collect();
        let values: Vec<f64> = members.iter().map(|&t| means[t]).collect();
        let center = median(&values);
        let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
        let sigma = MAD_TO_SIGMA * median(&deviations);
        if sigma <= 0.0 {
            continue;
        }
        outliers.extend(
            members
                .into_iter()
                .filter(|&t| (means[t] - center).abs() / sigma > threshold),
        );
    }
    outliers.sort_unstable();
    outliers
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::volume::IDENTITY_AFFINE;
    use ndarray::Array4;
    use tempfile::TempDir;

    #[test]
    fn spike_is_flagged_within_its_shell() {
        let means = [100.0, 101.0, 99.0, 100.5, 400.0, 40.0, 41.0, 39.5, 40.5];
        let shells = [200, 200, 200, 200, 200, 1000, 1000, 1000, 1000];

        assert_eq!(outlier_frames(&means, &shells, 3.5), vec![4]);
    }

    #[test]
    fn shell_offsets_are_not_outliers() {
        let means = [100.0, 100.5, 99.5, 40.0, 40.5, 39.5];
        let shells = [200, 200, 200, 1000, 1000, 1000];

        assert!(outlier_frames(&means, &shells, 3.5).is_empty());
    }

    #[test]
    fn constant_shell_has_no_outliers() {
        assert!(outlier_frames(&[5.0, 5.0, 5.0], &[0, 0, 0], 3.5).is_empty());
    }

    #[test]
    fn removes_dummies_outliers_and_matching_bvals() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let input = dir.path().join("dwi.nii.gz");
        let bvals_in = dir.path().join("dwi.bval");
        let output = dir.path().join("clean/dwi_clean.nii.gz");
        let bvals_out = dir.path().join("clean/dwi_clean.bval");

        // frames: 2 dummies, then 7 regular frames with a spike at t = 5
        let levels = [900.0, 800.0, 100.0, 101.0, 99.0, 500.0, 100.5, 99.5, 100.0];
        let data = Array4::<f32>::from_shape_fn((3, 3, 2, levels.len()), |(_, _, _, t)| levels[t]);
        VolumeLoader::save(&data, &input, &IDENTITY_AFFINE, None).unwrap();
        VolumeLoader::write_bvals(&bvals_in, &[0.0, 0.0, 200.0, 200.0, 200.0, 200.0, 200.0, 200.0, 200.0])
            .unwrap();
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();

        let summary = clean_and_trim(&input, &output, 2, 3.5, &bvals_in, None, &bvals_out).unwrap();

        assert_eq!(summary.outliers, vec![3]);
        assert_eq!(summary.kept(), 6);
        let cleaned = VolumeLoader::load(&output).unwrap();
        assert_eq!(cleaned.shape(), &[3, 3, 2, 6]);
        assert!(cleaned.data.iter().all(|&v| v < 200.0));
        assert_eq!(VolumeLoader::read_bvals(&bvals_out).unwrap(), vec![200.0; 6]);
    }

    /// Frames of a b0 + b=200 series with the given whole-volume levels.
    fn write_series(dir: &Path, levels: &[f32]) -> std::path::PathBuf {
        let input = dir.join("dwi.nii.gz");
        let data = Array4::<f32>::from_shape_fn((2, 2, 2, levels.len()), |(_, _, _, t)| levels[t]);
        VolumeLoader::save(&data, &input, &IDENTITY_AFFINE, None).unwrap();
        input
    }

    #[test]
    fn without_bvals_only_dummies_are_removed() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let levels = [1000.0, 300.0, 302.0, 298.0, 301.0, 299.0, 303.0, 297.0];
        let input = write_series(dir.path(), &levels);
        let output = dir.path().join("clean.nii.gz");
        let bvals_out = dir.path().join("clean.bval");

        let summary = clean_and_trim(
            &input,
            &output,
            0,
            3.5,
            &dir.path().join("absent.bval"),
            None,
            &bvals_out,
        )
        .unwrap();

        assert!(summary.outliers.is_empty());
        assert_eq!(summary.kept(), 8);
        assert_eq!(VolumeLoader::load(&output).unwrap().shape(), &[2, 2, 2, 8]);
        assert!(!bvals_out.exists());
    }

    #[test]
    fn configured_bvals_keep_b0_and_are_written_out() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let levels = [5.0, 1000.0, 300.0, 302.0, 298.0, 301.0, 299.0, 303.0, 297.0];
        let input = write_series(dir.path(), &levels);
        let output = dir.path().join("clean.nii.gz");
        let bvals_out = dir.path().join("clean.bval");
        let bvals = [0.0, 0.0, 200.0, 200.0, 200.0, 200.0, 200.0, 200.0, 200.0];

        let summary = clean_and_trim(
            &input,
            &output,
            1,
            3.5,
            &dir.path().join("absent.bval"),
            Some(&bvals[..]),
            &bvals_out,
        )
        .unwrap();

        assert!(summary.outliers.is_empty());
        assert_eq!(
            VolumeLoader::read_bvals(&bvals_out).unwrap(),
            vec![0.0, 200.0, 200.0, 200.0, 200.0, 200.0, 200.0, 200.0]
        );
    }

    #[test]
    fn configured_bvals_must_cover_every_frame() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let input = write_series(dir.path(), &[1.0, 2.0, 3.0]);

        let err = clean_and_trim(
            &input,
            &dir.path().join("clean.nii.gz"),
            0,
            3.5,
            &dir.path().join("absent.bval"),
            Some(&[0.0, 1000.0][..]),
            &dir.path().join("clean.bval"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Format(VolumeLoaderError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn trimming_every_frame_fails() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let input = dir.path().join("dwi.nii.gz");
        let data = Array4::<f32>::zeros((2, 2, 2, 2));
        VolumeLoader::save(&data, &input, &IDENTITY_AFFINE, None).unwrap();

        let err = clean_and_trim(
            &input,
            &dir.path().join("out.nii.gz"),
            2,
            3.5,
            &dir.path().join("none.bval"),
            None,
            &dir.path().join("none_out.bval"),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Stats(StatsError::EmptyTimeAxis)));
    }
}
