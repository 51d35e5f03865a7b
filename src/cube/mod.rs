//! Spectral cubes.
//!
//! The fitting core only sees the [`Cube`] trait: a spatial grid of spectra
//! sharing one [`SpectralAxis`]. [`DataCube`] is the in-memory implementation
//! used by the CLI (loaded from JSON) and by the synthetic generator.

pub mod region;

pub use region::*;

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{SpectralAxis, Spectrum};
use crate::error::FitError;

/// How spectra inside a spatial region are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Mean,
    Sum,
}

/// Read access to a spectral cube.
///
/// Pixel coordinates are `(x, y)` with `0 ≤ x < nx`, `0 ≤ y < ny`; masks are
/// `nx × ny` matrices indexed the same way.
pub trait Cube: Sync {
    fn spatial_shape(&self) -> (usize, usize);

    fn spectral_axis(&self) -> &SpectralAxis;

    fn extract_spectrum(&self, x: usize, y: usize) -> Result<Spectrum, FitError>;

    /// Combine every masked pixel into one spectrum.
    fn extract_spectrum_region(
        &self,
        mask: &DMatrix<bool>,
        aggregate: Aggregate,
    ) -> Result<(SpectralAxis, Spectrum), FitError> {
        check_mask(mask, self.spatial_shape())?;
        let mut total = vec![0.0; self.spectral_axis().len()];
        let mut count = 0usize;
        for x in 0..mask.nrows() {
            for y in 0..mask.ncols() {
                if !mask[(x, y)] {
                    continue;
                }
                let spectrum = self.extract_spectrum(x, y)?;
                for (t, v) in total.iter_mut().zip(spectrum.values()) {
                    *t += v;
                }
                count += 1;
            }
        }
        if count == 0 {
            return Err(FitError::validation("region selects no pixels"));
        }
        if aggregate == Aggregate::Mean {
            let n = count as f64;
            total.iter_mut().for_each(|t| *t /= n);
        }
        Ok((self.spectral_axis().clone(), Spectrum::new(total)))
    }
}

/// Masks must cover the cube's spatial grid exactly.
pub fn check_mask(mask: &DMatrix<bool>, shape: (usize, usize)) -> Result<(), FitError> {
    if mask.shape() != shape {
        return Err(FitError::validation(format!(
            "mask is {}x{} but the cube is {}x{}",
            mask.nrows(),
            mask.ncols(),
            shape.0,
            shape.1
        )));
    }
    Ok(())
}

/// Dense in-memory cube, spectra stored contiguously per pixel (`x`-major).
#[derive(Debug, Clone, PartialEq)]
pub struct DataCube {
    nx: usize,
    ny: usize,
    axis: SpectralAxis,
    data: Vec<f64>,
}

impl DataCube {
    pub fn new(nx: usize, ny: usize, axis: SpectralAxis, data: Vec<f64>) -> Result<Self, FitError> {
        if nx == 0 || ny == 0 {
            return Err(FitError::validation("cube must have at least one pixel"));
        }
        let expected = nx * ny * axis.len();
        if data.len() != expected {
            return Err(FitError::validation(format!(
                "cube data has {} values, expected {nx} x {ny} x {} = {expected}",
                data.len(),
                axis.len()
            )));
        }
        Ok(Self { nx, ny, axis, data })
    }

    pub fn zeros(nx: usize, ny: usize, axis: SpectralAxis) -> Result<Self, FitError> {
        let n = nx * ny * axis.len();
        Self::new(nx, ny, axis, vec![0.0; n])
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    fn offset(&self, x: usize, y: usize) -> Result<usize, FitError> {
        if x >= self.nx || y >= self.ny {
            return Err(FitError::validation(format!(
                "pixel ({x}, {y}) is outside the {}x{} cube",
                self.nx, self.ny
            )));
        }
        Ok((x * self.ny + y) * self.axis.len())
    }

    pub fn set_spectrum(&mut self, x: usize, y: usize, values: &[f64]) -> Result<(), FitError> {
        if values.len() != self.axis.len() {
            return Err(FitError::validation(format!(
                "spectrum has {} samples but the cube axis has {}",
                values.len(),
                self.axis.len()
            )));
        }
        let start = self.offset(x, y)?;
        self.data[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }
}

impl Cube for DataCube {
    fn spatial_shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    fn spectral_axis(&self) -> &SpectralAxis {
        &self.axis
    }

    fn extract_spectrum(&self, x: usize, y: usize) -> Result<Spectrum, FitError> {
        let start = self.offset(x, y)?;
        Ok(Spectrum::new(self.data[start..start + self.axis.len()].to_vec()))
    }
}
