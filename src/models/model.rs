//! Forward model for a line complex.
//!
//! The fitter relies on two primitive operations:
//! - evaluate the summed line profiles over a set of axis positions (residuals)
//! - turn a parameter vector back into per-line physical quantities (maps)
//!
//! Both live on [`LineModel`], which binds a [`LineComplex`] to a line shape,
//! the axis unit and the systemic redshift.

use crate::domain::{LineComplex, LineShape, SpectralUnit, broadening_to_sigma};
use crate::error::FitError;
use crate::math::{gaussian, gaussian_area, sincgauss, sincgauss_area};

use super::params::{ParamLayout, PhysicalParams, split};

#[derive(Debug, Clone, Copy)]
pub struct LineModel<'a> {
    complex: &'a LineComplex,
    shape: LineShape,
    unit: SpectralUnit,
    redshift: f64,
}

/// Per-line quantities derived from a parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct LineQuantities {
    pub velocity: f64,
    pub broadening: f64,
    pub amplitude: f64,
    /// Line centre in native axis units.
    pub center: f64,
    /// Gaussian σ in native axis units.
    pub sigma: f64,
    pub flux: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedParams {
    pub physical: PhysicalParams,
    pub lines: Vec<LineQuantities>,
}

impl<'a> LineModel<'a> {
    pub fn new(complex: &'a LineComplex, shape: LineShape, unit: SpectralUnit, redshift: f64) -> Self {
        Self {
            complex,
            shape,
            unit,
            redshift,
        }
    }

    pub fn complex(&self) -> &'a LineComplex {
        self.complex
    }

    pub fn layout(&self) -> &'a ParamLayout {
        self.complex.layout()
    }

    pub fn shape(&self) -> LineShape {
        self.shape
    }

    pub fn unit(&self) -> SpectralUnit {
        self.unit
    }

    pub fn redshift(&self) -> f64 {
        self.redshift
    }

    /// Centre of line `line` at velocity `velocity` (km/s).
    pub fn center_at(&self, line: usize, velocity: f64) -> f64 {
        let rest = self.complex.lines()[line].rest_nm;
        self.unit.line_center(rest, self.redshift, velocity)
    }

    pub fn line_center(&self, line: usize, params: &[f64]) -> f64 {
        self.center_at(line, params[self.layout().velocity_index(line)])
    }

    pub fn line_sigma(&self, line: usize, params: &[f64]) -> f64 {
        let broadening = params[self.layout().broadening_index(line)];
        broadening_to_sigma(self.line_center(line, params), broadening)
    }

    /// Unit-peak profile value.
    pub fn profile(&self, x: f64, center: f64, sigma: f64) -> f64 {
        match self.shape {
            LineShape::Gaussian => gaussian(x, center, sigma),
            LineShape::SincGauss { sinc_width } => sincgauss(x, center, sigma, sinc_width),
        }
    }

    /// Integral of the unit-peak profile with width `sigma`.
    pub fn profile_area(&self, sigma: f64) -> f64 {
        match self.shape {
            LineShape::Gaussian => gaussian_area(sigma),
            LineShape::SincGauss { sinc_width } => sincgauss_area(sigma, sinc_width),
        }
    }

    /// Integrated flux of one line.
    pub fn line_flux(&self, line: usize, params: &[f64]) -> f64 {
        let amplitude = params[self.layout().amplitude_index(line)];
        amplitude * self.profile_area(self.line_sigma(line, params))
    }

    /// Sum of all line profiles (plus continuum) at each `x`, written into `out`.
    ///
    /// # Panics
    /// Panics if `params` is shorter than the layout or `out` shorter than `x`.
    /// [`LineModel::evaluate`] is the checked entry point.
    pub fn evaluate_into(&self, x: &[f64], params: &[f64], out: &mut [f64]) {
        let layout = self.layout();
        let base = layout.continuum_index().map(|i| params[i]).unwrap_or(0.0);
        out[..x.len()].fill(base);

        for line in 0..layout.n_lines() {
            let amplitude = params[layout.amplitude_index(line)];
            let center = self.line_center(line, params);
            let sigma = self.line_sigma(line, params);
            for (o, &xi) in out.iter_mut().zip(x) {
                *o += amplitude * self.profile(xi, center, sigma);
            }
        }
    }

    pub fn evaluate(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, FitError> {
        self.layout().check_len(params)?;
        let mut out = vec![0.0; x.len()];
        self.evaluate_into(x, params, &mut out);
        Ok(out)
    }

    /// Per-line physical quantities (including integrated flux) for a parameter vector.
    pub fn decode(&self, params: &[f64]) -> Result<DecodedParams, FitError> {
        let physical = split(self.layout(), params)?;
        let layout = self.layout();
        let lines = (0..layout.n_lines())
            .map(|line| LineQuantities {
                velocity: params[layout.velocity_index(line)],
                broadening: params[layout.broadening_index(line)],
                amplitude: params[layout.amplitude_index(line)],
                center: self.line_center(line, params),
                sigma: self.line_sigma(line, params),
                flux: self.line_flux(line, params),
            })
            .collect();
        Ok(DecodedParams { physical, lines })
    }
}
