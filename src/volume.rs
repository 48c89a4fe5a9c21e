use crate::enums::Orientation;

use ndarray::ArrayD;
use ndarray::ArrayView2;
use ndarray::ArrayView3;
use ndarray::ArrayView4;
use ndarray::Axis;
use ndarray::Ix3;
use ndarray::Ix4;
use nifti::NiftiHeader;

/// Row-major 4x4 voxel-to-world transform.
pub type Affine = [[f64; 4]; 4];

pub const IDENTITY_AFFINE: Affine = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// An in-memory 3D or 4D image in NIfTI index order (x, y, z[, t]).
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: ArrayD<f32>,
    pub affine: Affine,
    pub header: Option<NiftiHeader>,
}

impl Volume {
    pub fn new(data: ArrayD<f32>, affine: Affine) -> Self {
        Self {
            data,
            affine,
            header: None,
        }
    }

    pub fn with_header(mut self, header: NiftiHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Get the shape of the volume, time last for 4D data
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Number of frames along the time axis; a 3D volume counts as one frame.
    pub fn n_frames(&self) -> usize {
        match self.ndim() {
            4 => self.shape()[3],
            _ => 1,
        }
    }

    pub fn as_4d(&self) -> Option<ArrayView4<'_, f32>> {
        self.data.view().into_dimensionality::<Ix4>().ok()
    }

    /// Spatial 3D view of frame `time`. For 3D volumes only frame 0 exists.
    pub fn frame(&self, time: usize) -> Option<ArrayView3<'_, f32>> {
        match self.ndim() {
            3 if time == 0 => self.data.view().into_dimensionality::<Ix3>().ok(),
            4 if time < self.n_frames() => self
                .data
                .index_axis(Axis(3), time)
                .into_dimensionality::<Ix3>()
                .ok(),
            _ => None,
        }
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        time: usize,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let frame = self.frame(time)?;
        Some(frame.index_axis_move(Axis(orientation.axis()), index))
    }

    fn is_valid_index(&self, index: usize, orientation: Orientation) -> bool {
        self.ndim() >= 3 && index < self.shape()[orientation.axis()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    #[test]
    fn frame_of_4d_volume_selects_time_index() {
        let mut data = Array4::<f32>::zeros((2, 3, 4, 5));
        data[[1, 2, 3, 4]] = 7.0;
        let volume = Volume::new(data.into_dyn(), IDENTITY_AFFINE);

        assert_eq!(volume.n_frames(), 5);
        let frame = volume.frame(4).unwrap();
        assert_eq!(frame.dim(), (2, 3, 4));
        assert_eq!(frame[[1, 2, 3]], 7.0);
        assert!(volume.frame(5).is_none());
    }

    #[test]
    fn slices_follow_orientation_axis() {
        let data = Array3::<f32>::from_shape_fn((2, 3, 4), |(x, y, z)| (x * 100 + y * 10 + z) as f32);
        let volume = Volume::new(data.into_dyn(), IDENTITY_AFFINE);

        let axial = volume.get_slice_from_axis(3, Orientation::Axial, 0).unwrap();
        assert_eq!(axial.dim(), (2, 3));
        assert_eq!(axial[[1, 2]], 123.0);

        let sagittal = volume.get_slice_from_axis(1, Orientation::Sagittal, 0).unwrap();
        assert_eq!(sagittal.dim(), (3, 4));
        assert_eq!(sagittal[[0, 0]], 100.0);

        assert!(volume.get_slice_from_axis(4, Orientation::Axial, 0).is_none());
    }
}
