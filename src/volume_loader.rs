use crate::volume::{Affine, Volume};

use ndarray::{ArrayBase, Data, Dimension, RemoveAxis};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiError, NiftiHeader, NiftiObject, ReaderOptions};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// NIfTI `sform_code` for "aligned to another file's coordinates", as written by nibabel.
const SFORM_ALIGNED: i16 = 2;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("volume file not found: {path}", path = .0.display())]
    NotFound(PathBuf),

    #[error("invalid NIfTI file {path}: {source}", path = path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: NiftiError,
    },

    #[error("expected a 3D or 4D volume, got {0} dimensions")]
    UnsupportedDimensions(usize),

    #[error("{path} has shape {found:?}, expected {expected:?}", path = path.display())]
    ShapeMismatch {
        path: PathBuf,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("invalid sidecar {path}: {reason}", path = path.display())]
    InvalidSidecar { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a 3D or 4D NIfTI volume (`.nii` or `.nii.gz`)
    ///
    /// Scaling (`scl_slope`/`scl_inter`) is applied, so the returned data is
    /// always in real-world units.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeLoaderError::NotFound`] if the file does not exist and
    /// [`VolumeLoaderError::Format`] if it is not a readable NIfTI image.
    pub fn load(path: impl AsRef<Path>) -> Result<Volume, VolumeLoaderError> {
        let path = path.as_ref();
        Self::ensure_exists(path)?;

        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|source| Self::format_error(path, source))?;
        let header = object.header().clone();
        let data = object
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(|source| Self::format_error(path, source))?;

        if !(3..=4).contains(&data.ndim()) {
            return Err(VolumeLoaderError::UnsupportedDimensions(data.ndim()));
        }

        let affine = Self::affine_from_header(&header);
        Ok(Volume::new(data, affine).with_header(header))
    }

    /// Read only the voxel-to-world transform. Only the header is decoded.
    pub fn load_affine(path: impl AsRef<Path>) -> Result<Affine, VolumeLoaderError> {
        let path = path.as_ref();
        Self::ensure_exists(path)?;

        let header = NiftiHeader::from_file(path).map_err(|source| Self::format_error(path, source))?;
        Ok(Self::affine_from_header(&header))
    }

    /// Save an array as a NIfTI image, gzip-compressed when `path` ends in `.gz`
    ///
    /// # Arguments
    ///
    /// * `data` - voxel data in (x, y, z[, t]) order
    /// * `path` - destination; parent directories are created
    /// * `affine` - voxel-to-world transform, stored as the sform
    /// * `header` - header to attach; a default one is synthesized when absent
    ///
    /// The affine always wins over any transform already present in `header`,
    /// and scaling is reset because `data` is written unscaled. The sform is
    /// stored in single precision.
    pub fn save<S, D>(
        data: &ArrayBase<S, D>,
        path: impl AsRef<Path>,
        affine: &Affine,
        header: Option<&NiftiHeader>,
    ) -> Result<(), VolumeLoaderError>
    where
        S: Data<Elem = f32>,
        D: Dimension + RemoveAxis,
    {
        let path = path.as_ref();
        let mut header = header.cloned().unwrap_or_default();
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        Self::set_affine(&mut header, affine);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        WriterOptions::new(path)
            .reference_header(&header)
            .write_nifti(data)
            .map_err(|source| Self::format_error(path, source))
    }

    /// Save a [`Volume`] with its own affine and header.
    pub fn save_volume(volume: &Volume, path: impl AsRef<Path>) -> Result<(), VolumeLoaderError> {
        Self::save(&volume.data, path, &volume.affine, volume.header.as_ref())
    }

    /// Read an FSL-style b-value sidecar (whitespace separated numbers).
    pub fn read_bvals(path: impl AsRef<Path>) -> Result<Vec<f64>, VolumeLoaderError> {
        let path = path.as_ref();
        Self::ensure_exists(path)?;

        fs::read_to_string(path)?
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|e| VolumeLoaderError::InvalidSidecar {
                    path: path.to_path_buf(),
                    reason: format!("'{token}' is not a number: {e}"),
                })
            })
            .collect()
    }

    pub fn write_bvals(path: impl AsRef<Path>, bvals: &[f64]) -> Result<(), VolumeLoaderError> {
        let line = bvals
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        fs::write(path, format!("{line}\n"))?;
        Ok(())
    }

    /// Voxel-to-world transform following the NIfTI-1 precedence: sform,
    /// then qform, then plain voxel scaling.
    pub fn affine_from_header(header: &NiftiHeader) -> Affine {
        if header.sform_code > 0 {
            let row = |r: &[f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
            return [
                row(&header.srow_x),
                row(&header.srow_y),
                row(&header.srow_z),
                [0.0, 0.0, 0.0, 1.0],
            ];
        }

        let zoom = |i: usize| match header.pixdim[i] as f64 {
            z if z > 0.0 => z,
            _ => 1.0,
        };
        let (dx, dy, dz) = (zoom(1), zoom(2), zoom(3));

        if header.qform_code <= 0 {
            return [
                [dx, 0.0, 0.0, 0.0],
                [0.0, dy, 0.0, 0.0],
                [0.0, 0.0, dz, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ];
        }

        let (b, c, d) = (
            header.quatern_b as f64,
            header.quatern_c as f64,
            header.quatern_d as f64,
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let rotation = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
        ];
        let offsets = [
            header.quatern_x as f64,
            header.quatern_y as f64,
            header.quatern_z as f64,
        ];

        let mut affine = [[0.0; 4]; 4];
        for (i, row) in rotation.iter().enumerate() {
            affine[i] = [row[0] * dx, row[1] * dy, row[2] * dz * qfac, offsets[i]];
        }
        affine[3] = [0.0, 0.0, 0.0, 1.0];
        affine
    }

    fn set_affine(header: &mut NiftiHeader, affine: &Affine) {
        let row = |r: &[f64; 4]| [r[0] as f32, r[1] as f32, r[2] as f32, r[3] as f32];
        header.srow_x = row(&affine[0]);
        header.srow_y = row(&affine[1]);
        header.srow_z = row(&affine[2]);
        if header.sform_code <= 0 {
            header.sform_code = SFORM_ALIGNED;
        }

        for axis in 0..3 {
            let norm = (0..3)
                .map(|r| affine[r][axis] * affine[r][axis])
                .sum::<f64>()
                .sqrt();
            header.pixdim[axis + 1] = norm as f32;
        }
        if header.pixdim[0] == 0.0 {
            header.pixdim[0] = 1.0;
        }
    }

    fn ensure_exists(path: &Path) -> Result<(), VolumeLoaderError> {
        if path.is_file() {
            Ok(())
        } else {
            Err(VolumeLoaderError::NotFound(path.to_path_buf()))
        }
    }

    fn format_error(path: &Path, source: NiftiError) -> VolumeLoaderError {
        VolumeLoaderError::Format {
            path: path.to_path_buf(),
            source,
        }
    }
}
