//! Grid overview of every slice of a volume, for eyeballing pipeline outputs.

use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma};
use ndarray::ArrayView2;
use rayon::prelude::*;
use thiserror::Error;

use crate::enums::Orientation;
use crate::volume::Volume;

#[derive(Debug, Error)]
pub enum MontageError {
    #[error("frame {time} requested but the volume has {frames} frame(s)")]
    InvalidTime { time: usize, frames: usize },

    #[error("volume has no slices along the requested axis")]
    Empty,

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub struct Montage {
    pub orientation: Orientation,
    pub rows: usize,
    /// Frame shown for 4D volumes (a b-value index for DWI).
    pub time: usize,
}

impl Default for Montage {
    fn default() -> Self {
        Self {
            orientation: Orientation::Axial,
            rows: 2,
            time: 15,
        }
    }
}

impl Montage {
    /// Render all slices into a `rows` x `ceil(n / rows)` grid.
    ///
    /// Each tile is transposed and flipped so the first in-plane axis runs
    /// left to right and the second runs bottom to top. Tiles are min-max
    /// normalized individually.
    pub fn render(&self, volume: &Volume) -> Result<GrayImage, MontageError> {
        let time = if volume.ndim() == 3 { 0 } else { self.time };
        if volume.frame(time).is_none() {
            return Err(MontageError::InvalidTime {
                time,
                frames: volume.n_frames(),
            });
        }

        let count = volume.shape()[self.orientation.axis()];
        let rows = self.rows.max(1);
        if count == 0 {
            return Err(MontageError::Empty);
        }
        let cols = count.div_ceil(rows);

        let tiles: Vec<GrayImage> = (0..count)
            .filter_map(|index| volume.get_slice_from_axis(index, self.orientation, time))
            .map(|slice| Self::slice_to_image(&slice))
            .collect::<Option<_>>()
            .ok_or(MontageError::Empty)?;

        let (tile_width, tile_height) = tiles[0].dimensions();
        let mut canvas = GrayImage::new(tile_width * cols as u32, tile_height * rows as u32);
        for (i, tile) in tiles.iter().enumerate() {
            let x0 = (i % cols) as u32 * tile_width;
            let y0 = (i / cols) as u32 * tile_height;
            for (x, y, pixel) in tile.enumerate_pixels() {
                canvas.put_pixel(x0 + x, y0 + y, *pixel);
            }
        }

        Ok(canvas)
    }

    pub fn save(&self, volume: &Volume, path: impl AsRef<Path>) -> Result<(), MontageError> {
        self.render(volume)?.save(path)?;
        Ok(())
    }

    fn slice_to_image(slice: &ArrayView2<'_, f32>) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = slice.dim();
        let (min, max) = slice
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|row| {
                let y = height - 1 - row;
                (0..width).map(move |x| Self::normalize_to_u8(slice[[x, y]], min, max))
            })
            .collect();

        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    #[inline]
    fn normalize_to_u8(value: f32, min: f32, max: f32) -> u8 {
        if !value.is_finite() || max <= min {
            return 0;
        }
        (((value - min) / (max - min)) * 255.0).clamp(0.0, 255.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::IDENTITY_AFFINE;
    use ndarray::{Array3, Array4};

    #[test]
    fn grid_has_two_rows_of_slices() {
        let data = Array3::<f32>::from_shape_fn((4, 3, 5), |(x, _, z)| (x + z) as f32);
        let volume = Volume::new(data.into_dyn(), IDENTITY_AFFINE);

        let image = Montage::default().render(&volume).unwrap();

        // five slices on two rows -> three columns
        assert_eq!(image.dimensions(), (4 * 3, 3 * 2));
    }

    #[test]
    fn tiles_are_flipped_so_origin_is_lower_left() {
        let data = Array3::<f32>::from_shape_fn((2, 2, 1), |(x, y, _)| (x + 2 * y) as f32);
        let volume = Volume::new(data.into_dyn(), IDENTITY_AFFINE);
        let montage = Montage {
            rows: 1,
            ..Montage::default()
        };

        let image = montage.render(&volume).unwrap();

        // voxel (0, 0) is the minimum and sits bottom-left
        assert_eq!(image.get_pixel(0, 1).0[0], 0);
        // voxel (1, 1) is the maximum and sits top-right
        assert_eq!(image.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn out_of_range_frame_is_rejected() {
        let data = Array4::<f32>::zeros((2, 2, 2, 3));
        let volume = Volume::new(data.into_dyn(), IDENTITY_AFFINE);

        let err = Montage::default().render(&volume).unwrap_err();
        assert!(matches!(err, MontageError::InvalidTime { time: 15, frames: 3 }));
    }
}
