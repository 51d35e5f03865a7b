//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - handed to external collaborators (plotting, ML predictors)

use std::ops::Range;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::cube::{Aggregate, RegionShape};
use crate::error::FitError;
use crate::fit::NoiseModel;
use crate::models::BoundsConfig;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;

/// Native unit of a spectral axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SpectralUnit {
    /// Wavenumber in cm⁻¹ (SITELLE cubes).
    Wavenumber,
    /// Wavelength in Å.
    Wavelength,
}

impl SpectralUnit {
    /// Observed line centre for a rest wavelength (nm), redshift `z` and
    /// line-of-sight velocity (km/s) measured from the redshifted rest frame.
    ///
    /// `λ_obs = λ_rest (1 + z) (1 + v / c)`
    pub fn line_center(self, rest_nm: f64, redshift: f64, velocity: f64) -> f64 {
        let observed_nm = rest_nm * (1.0 + redshift) * (1.0 + velocity / SPEED_OF_LIGHT_KMS);
        match self {
            SpectralUnit::Wavenumber => 1e7 / observed_nm,
            SpectralUnit::Wavelength => observed_nm * 10.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpectralUnit::Wavenumber => "cm-1",
            SpectralUnit::Wavelength => "Angstrom",
        }
    }
}

/// Gaussian σ in native spectral units for a line at `center` with velocity
/// dispersion `broadening` (km/s): `σ = center · broadening / c`.
pub fn broadening_to_sigma(center: f64, broadening: f64) -> f64 {
    center.abs() * broadening / SPEED_OF_LIGHT_KMS
}

/// Strictly increasing spectral sample positions shared by every spectrum of a cube.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralAxis {
    values: Vec<f64>,
    unit: SpectralUnit,
}

impl SpectralAxis {
    pub fn new(values: Vec<f64>, unit: SpectralUnit) -> Result<Self, FitError> {
        if values.len() < 2 {
            return Err(FitError::validation(format!(
                "spectral axis needs at least 2 samples, got {}",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FitError::validation("spectral axis contains non-finite values"));
        }
        if values.windows(2).any(|w| w[1] <= w[0]) {
            return Err(FitError::validation("spectral axis must be strictly increasing"));
        }
        Ok(Self { values, unit })
    }

    /// `n` evenly spaced samples from `start` to `end` (inclusive).
    pub fn linspace(start: f64, end: f64, n: usize, unit: SpectralUnit) -> Result<Self, FitError> {
        if n < 2 {
            return Err(FitError::validation("spectral axis needs at least 2 samples"));
        }
        let step = (end - start) / (n as f64 - 1.0);
        let values = (0..n).map(|i| start + step * i as f64).collect();
        Self::new(values, unit)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn unit(&self) -> SpectralUnit {
        self.unit
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> f64 {
        self.values[0]
    }

    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.min() && x <= self.max()
    }

    /// Mean sample spacing.
    pub fn step(&self) -> f64 {
        (self.max() - self.min()) / (self.values.len() as f64 - 1.0)
    }

    /// Index of the sample closest to `x` (clamped to the axis).
    pub fn nearest_index(&self, x: f64) -> usize {
        let idx = self.values.partition_point(|&v| v < x);
        if idx == 0 {
            return 0;
        }
        if idx >= self.values.len() {
            return self.values.len() - 1;
        }
        if (x - self.values[idx - 1]).abs() <= (self.values[idx] - x).abs() {
            idx - 1
        } else {
            idx
        }
    }

    /// Index range of samples inside `range` (inclusive bounds); the full axis when `None`.
    pub fn window(&self, range: Option<(f64, f64)>) -> Range<usize> {
        match range {
            None => 0..self.values.len(),
            Some((lo, hi)) => {
                let start = self.values.partition_point(|&v| v < lo);
                let end = self.values.partition_point(|&v| v <= hi);
                start..end.max(start)
            }
        }
    }
}

/// One extracted spectrum (intensity samples aligned to a [`SpectralAxis`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    values: Vec<f64>,
}

impl Spectrum {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn zeros(n: usize) -> Self {
        Self { values: vec![0.0; n] }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Element-wise `self - background`.
    pub fn subtract(&self, background: &Spectrum) -> Result<Spectrum, FitError> {
        if background.len() != self.len() {
            return Err(FitError::validation(format!(
                "background has {} samples but spectrum has {}",
                background.len(),
                self.len()
            )));
        }
        let values = self
            .values
            .iter()
            .zip(background.values.iter())
            .map(|(s, b)| s - b)
            .collect();
        Ok(Spectrum { values })
    }
}

/// Which line-shape family to fit (CLI-facing tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Gaussian,
    Sincgauss,
}

impl ModelKind {
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Gaussian => "gaussian",
            ModelKind::Sincgauss => "sincgauss",
        }
    }

    /// Resolve to a concrete [`LineShape`]; sincgauss needs a positive sinc width.
    pub fn shape(self, sinc_width: Option<f64>) -> Result<LineShape, FitError> {
        match self {
            ModelKind::Gaussian => Ok(LineShape::Gaussian),
            ModelKind::Sincgauss => {
                let width = sinc_width.ok_or_else(|| {
                    FitError::validation("sincgauss model requires a sinc width (or instrument parameters)")
                })?;
                LineShape::sincgauss(width)
            }
        }
    }
}

/// Line-shape family with its fixed instrument constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LineShape {
    Gaussian,
    /// Gaussian convolved with `sinc(π x / sinc_width)`; `sinc_width` is in
    /// native spectral units and is never fit.
    SincGauss { sinc_width: f64 },
}

impl LineShape {
    pub fn sincgauss(sinc_width: f64) -> Result<Self, FitError> {
        if !(sinc_width.is_finite() && sinc_width > 0.0) {
            return Err(FitError::validation(format!(
                "sinc width must be finite and > 0, got {sinc_width}"
            )));
        }
        Ok(LineShape::SincGauss { sinc_width })
    }

    pub fn kind(self) -> ModelKind {
        match self {
            LineShape::Gaussian => ModelKind::Gaussian,
            LineShape::SincGauss { .. } => ModelKind::Sincgauss,
        }
    }
}

/// SITELLE filter presets: fit window and off-band noise window (cm⁻¹).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum Filter {
    #[value(name = "SN1")]
    Sn1,
    #[value(name = "SN2")]
    Sn2,
    #[value(name = "SN3")]
    Sn3,
    /// C4 observations of Hα at z ≈ 0.25 land in the SN3 window.
    #[value(name = "C4")]
    C4,
}

impl Filter {
    pub fn fit_range(self) -> (f64, f64) {
        match self {
            Filter::Sn1 => (26_000.0, 27_400.0),
            Filter::Sn2 => (19_500.0, 20_750.0),
            Filter::Sn3 | Filter::C4 => (14_500.0, 15_400.0),
        }
    }

    pub fn noise_window(self) -> (f64, f64) {
        match self {
            Filter::Sn1 => (25_300.0, 25_700.0),
            Filter::Sn2 => (18_600.0, 19_000.0),
            Filter::Sn3 | Filter::C4 => (14_300.0, 14_500.0),
        }
    }
}

/// Velocity and velocity dispersion of a line group (km/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    pub velocity: f64,
    pub broadening: f64,
}

/// Solver outcome attached to a [`FitResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    /// The iteration cap was hit before any tolerance was met.
    IterationLimit,
}

/// Derived physical quantities for one fitted line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineFit {
    pub name: String,
    pub velocity: f64,
    pub velocity_err: f64,
    pub broadening: f64,
    pub broadening_err: f64,
    pub amplitude: f64,
    pub amplitude_err: f64,
    pub flux: f64,
    pub flux_err: f64,
}

/// Fit output for a single spectrum.
#[derive(Debug, Clone, Serialize)]
pub struct FitResult {
    /// Fitted parameter vector (amplitudes in data units).
    pub params: Vec<f64>,
    /// 1-σ parameter errors from the covariance estimate (NaN when unavailable).
    pub uncertainties: Vec<f64>,
    pub lines: Vec<LineFit>,
    /// Constant continuum level (0 when the continuum term is disabled).
    pub continuum: f64,
    pub continuum_err: f64,
    /// Reduced chi-squared.
    pub chi2: f64,
    pub ssr: f64,
    pub dof: usize,
    pub n_samples: usize,
    pub iterations: usize,
    pub status: FitStatus,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub cube_path: PathBuf,
    pub lines: Vec<String>,
    /// Tie group per line (defaults to a single shared group).
    pub groups: Vec<usize>,
    pub untie_velocity: Vec<String>,
    pub untie_broadening: Vec<String>,
    pub model: ModelKind,
    pub sinc_width: Option<f64>,
    pub redshift: f64,
    pub fit_range: Option<(f64, f64)>,
    pub continuum: bool,
    pub noise: NoiseModel,
    pub bounds: BoundsConfig,
    pub default_broadening: f64,
    pub max_iterations: usize,

    pub region: Vec<RegionShape>,
    pub background_region: Vec<RegionShape>,
    pub aggregate: Aggregate,

    pub threads: Option<usize>,
    pub accept_iteration_limit: bool,

    pub export_maps: Option<PathBuf>,
    pub export_csv: Option<PathBuf>,
}
