//! Per-voxel statistics along the time axis of a 4D volume.

use ndarray::{Array3, ArrayView4, Axis, Zip};
use thiserror::Error;

use crate::volume::Volume;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error("time axis is empty")]
    EmptyTimeAxis,

    #[error("expected a 4D volume, got {0} dimensions")]
    NotFourDimensional(usize),
}

const TIME: Axis = Axis(3);

/// View a loaded volume as the (x, y, z, t) array the statistics expect.
pub fn as_timeseries(volume: &Volume) -> Result<ArrayView4<'_, f32>, StatsError> {
    volume
        .as_4d()
        .ok_or(StatsError::NotFourDimensional(volume.ndim()))
}

/// Arithmetic mean across the last axis.
pub fn temporal_mean(volume: ArrayView4<'_, f32>) -> Result<Array3<f32>, StatsError> {
    volume.mean_axis(TIME).ok_or(StatsError::EmptyTimeAxis)
}

/// Population standard deviation across the last axis.
pub fn temporal_std(volume: ArrayView4<'_, f32>) -> Result<Array3<f32>, StatsError> {
    if volume.len_of(TIME) == 0 {
        return Err(StatsError::EmptyTimeAxis);
    }
    Ok(volume.std_axis(TIME, 0.0))
}

/// `mean / (std * sqrt(repetition_time))` per voxel.
///
/// Voxels with zero standard deviation come out as `inf` (or `NaN` when the
/// mean is zero too); they are returned as-is.
pub fn temporal_snr(
    volume: ArrayView4<'_, f32>,
    repetition_time: f32,
) -> Result<Array3<f32>, StatsError> {
    let mean = temporal_mean(volume)?;
    let std = temporal_std(volume)?;
    let tr_sqrt = repetition_time.sqrt();

    Ok(Zip::from(&mean)
        .and(&std)
        .par_map_collect(|&m, &s| m / (s * tr_sqrt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    #[test]
    fn constant_volume_has_mean_c_and_zero_std() {
        let data = Array4::<f32>::from_elem((3, 4, 2, 6), 12.5);

        let mean = temporal_mean(data.view()).unwrap();
        let std = temporal_std(data.view()).unwrap();

        assert_eq!(mean.dim(), (3, 4, 2));
        assert!(mean.iter().all(|&m| m == 12.5));
        assert!(std.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn std_is_population_std() {
        let mut data = Array4::<f32>::zeros((1, 1, 1, 4));
        for (t, v) in [2.0, 4.0, 4.0, 6.0].into_iter().enumerate() {
            data[[0, 0, 0, t]] = v;
        }

        let std = temporal_std(data.view()).unwrap();
        // population variance = 2, sample variance would be 8/3
        assert_relative_eq!(std[[0, 0, 0]], 2.0f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn snr_divides_by_std_times_sqrt_tr() {
        let mut data = Array4::<f32>::zeros((1, 1, 1, 2));
        data[[0, 0, 0, 0]] = 8.0;
        data[[0, 0, 0, 1]] = 12.0;

        let snr = temporal_snr(data.view(), 4.0).unwrap();
        // mean 10, std 2, sqrt(TR) 2
        assert_relative_eq!(snr[[0, 0, 0]], 2.5, epsilon = 1e-6);
    }

    #[test]
    fn snr_keeps_non_finite_voxels() {
        let mut data = Array4::<f32>::from_elem((2, 1, 1, 3), 5.0);
        data[[1, 0, 0, 0]] = 0.0;
        data[[1, 0, 0, 1]] = 0.0;
        data[[1, 0, 0, 2]] = 0.0;

        let snr = temporal_snr(data.view(), 2.0).unwrap();

        assert_eq!(snr.len(), 2);
        assert!(snr[[0, 0, 0]].is_infinite());
        assert!(snr[[1, 0, 0]].is_nan());
    }

    #[test]
    fn empty_time_axis_is_rejected() {
        let data = Array4::<f32>::zeros((2, 2, 2, 0));
        assert_eq!(temporal_mean(data.view()), Err(StatsError::EmptyTimeAxis));
        assert_eq!(temporal_std(data.view()), Err(StatsError::EmptyTimeAxis));
    }
}
