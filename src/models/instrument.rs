//! Fourier-transform spectrometer geometry.
//!
//! The sinc width and the native wavenumber axis of a SITELLE-like cube both
//! follow from the mirror step, the number of steps and the off-axis angle.

use serde::{Deserialize, Serialize};

use crate::domain::{SpectralAxis, SpectralUnit};
use crate::error::FitError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Mirror step (nm).
    pub step_nm: f64,
    pub n_steps: usize,
    /// Index of the zero path difference frame.
    pub zpd_index: usize,
    /// Off-axis angle (degrees).
    pub theta_deg: f64,
}

impl Instrument {
    /// SN3 filter, as shipped in SITELLE cubes.
    pub fn sitelle_sn3() -> Self {
        Self {
            step_nm: 2943.0,
            n_steps: 842,
            zpd_index: 169,
            theta_deg: 11.96,
        }
    }

    pub fn validate(&self) -> Result<(), FitError> {
        if !(self.step_nm.is_finite() && self.step_nm > 0.0) {
            return Err(FitError::validation("instrument step must be > 0"));
        }
        if self.n_steps < 2 || self.zpd_index >= self.n_steps {
            return Err(FitError::validation(format!(
                "instrument needs n_steps >= 2 and zpd_index < n_steps, got {} / {}",
                self.n_steps, self.zpd_index
            )));
        }
        if !(self.theta_deg.is_finite() && self.theta_deg.abs() < 90.0) {
            return Err(FitError::validation("off-axis angle must be within (-90, 90) degrees"));
        }
        Ok(())
    }

    /// Maximum optical path difference (cm).
    pub fn max_path_difference(&self) -> f64 {
        let cos = self.theta_deg.to_radians().cos();
        cos * self.step_nm * (self.n_steps - self.zpd_index) as f64 / 1e7
    }

    /// Width of the sinc instrument line shape (cm⁻¹): `1 / (2 · MPD)`.
    pub fn sinc_width(&self) -> Result<f64, FitError> {
        self.validate()?;
        Ok(1.0 / (2.0 * self.max_path_difference()))
    }

    /// Wavenumber axis covered by folding order `order`.
    pub fn spectral_axis(&self, order: u32) -> Result<SpectralAxis, FitError> {
        self.validate()?;
        if order == 0 {
            return Err(FitError::validation("folding order must be >= 1"));
        }
        let correction = 1.0 / self.theta_deg.to_radians().cos();
        let step_cm = self.step_nm * 1e-7;
        let x_min = order as f64 / (2.0 * step_cm) * correction;
        let x_max = (order + 1) as f64 / (2.0 * step_cm) * correction;
        let dx = (x_max - x_min) / self.n_steps as f64;
        let values = (0..self.n_steps).map(|j| x_min + dx * j as f64).collect();
        SpectralAxis::new(values, SpectralUnit::Wavenumber)
    }
}
