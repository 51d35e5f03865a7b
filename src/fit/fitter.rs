//! Single-spectrum fitting.
//!
//! Given:
//! - a spectral axis and one spectrum (optionally minus a background)
//! - a [`LineModel`] (line complex + line shape)
//! - an initial parameter vector and box constraints
//!
//! we:
//! - cut the fit window and normalise the intensities by the window's peak
//! - run the bounded Levenberg–Marquardt optimiser
//! - reject solutions that are unphysical or pinned to a bound
//! - rescale to data units and derive per-line quantities with errors
//!
//! [`SpectrumFitter`] bundles the per-cube constants (axis, model, options,
//! guess strategy) so the region driver can call it once per pixel.

use std::ops::Range;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::{FitResult, FitStatus, LineComplex, LineFit, LineShape, SpectralAxis, Spectrum};
use crate::error::FitError;
use crate::math::{LmConfig, ResidualModel, Termination, minimize, normal_matrix, pseudo_inverse};
use crate::models::{BoundsConfig, LineModel, ParamBounds, ParamKind, bounds};

use super::guess::{GuessInput, GuessStrategy, initial_guess};

/// How the noise level entering the reduced chi-squared is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseModel {
    /// χ²ᵣ is the plain residual variance.
    #[default]
    Unit,
    /// Known per-sample noise σ (data units).
    Fixed { sigma: f64 },
    /// Standard deviation of the spectrum inside an off-line axis window.
    Window { lower: f64, upper: f64 },
}

/// Options that affect every spectrum of a run.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Axis window `(min, max)` to fit; the full axis when `None`.
    pub fit_range: Option<(f64, f64)>,
    pub noise: NoiseModel,
    pub bounds: BoundsConfig,
    /// Starting broadening (km/s) for the heuristic guess.
    pub default_broadening: f64,
    pub lm: LmConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            fit_range: None,
            noise: NoiseModel::Unit,
            bounds: BoundsConfig::default(),
            default_broadening: 10.0,
            lm: LmConfig::default(),
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> Result<(), FitError> {
        self.bounds.validate()?;
        if let Some((lo, hi)) = self.fit_range {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(FitError::validation(format!("invalid fit range [{lo}, {hi}]")));
            }
        }
        match self.noise {
            NoiseModel::Fixed { sigma } if !(sigma.is_finite() && sigma > 0.0) => {
                return Err(FitError::validation(format!("noise sigma must be > 0, got {sigma}")));
            }
            NoiseModel::Window { lower, upper } if !(lower < upper) => {
                return Err(FitError::validation(format!(
                    "invalid noise window [{lower}, {upper}]"
                )));
            }
            _ => {}
        }
        if !(self.default_broadening.is_finite() && self.default_broadening > 0.0) {
            return Err(FitError::validation("default broadening must be > 0"));
        }
        if self.lm.max_iterations == 0 {
            return Err(FitError::validation("max iterations must be >= 1"));
        }
        Ok(())
    }
}

/// Background-subtracted spectrum and its fit window.
struct Prepared {
    values: Vec<f64>,
    window: Range<usize>,
}

fn prepare(
    axis: &SpectralAxis,
    spectrum: &Spectrum,
    background: Option<&Spectrum>,
    fit_range: Option<(f64, f64)>,
) -> Result<Prepared, FitError> {
    if spectrum.len() != axis.len() {
        return Err(FitError::validation(format!(
            "spectrum has {} samples but the axis has {}",
            spectrum.len(),
            axis.len()
        )));
    }
    let values = match background {
        Some(bg) => spectrum.subtract(bg)?.into_values(),
        None => spectrum.values().to_vec(),
    };
    let window = axis.window(fit_range);
    if window.is_empty() {
        return Err(FitError::validation(format!(
            "fit range {:?} does not overlap the spectral axis [{}, {}]",
            fit_range,
            axis.min(),
            axis.max()
        )));
    }
    if values[window.clone()].iter().any(|v| !v.is_finite()) {
        return Err(FitError::DegenerateFit(
            "spectrum contains non-finite samples in the fit window".to_string(),
        ));
    }
    Ok(Prepared { values, window })
}

fn noise_sigma(noise: NoiseModel, axis: &SpectralAxis, values: &[f64]) -> f64 {
    match noise {
        NoiseModel::Unit => 1.0,
        NoiseModel::Fixed { sigma } => sigma,
        NoiseModel::Window { lower, upper } => {
            let samples: Vec<f64> = values[axis.window(Some((lower, upper)))]
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .collect();
            if samples.len() < 2 {
                debug!(lower, upper, "noise window holds fewer than 2 samples; using unit noise");
                return 1.0;
            }
            let n = samples.len() as f64;
            let mean = samples.iter().sum::<f64>() / n;
            let var = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
            let sigma = var.sqrt();
            if sigma > 0.0 && sigma.is_finite() {
                sigma
            } else {
                debug!(lower, upper, "noise window has zero spread; using unit noise");
                1.0
            }
        }
    }
}

/// Residuals of the normalised model against the normalised window.
struct WindowResiduals<'m> {
    model: &'m LineModel<'m>,
    x: &'m [f64],
    y: &'m [f64],
}

impl ResidualModel for WindowResiduals<'_> {
    fn n_residuals(&self) -> usize {
        self.x.len()
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) {
        self.model.evaluate_into(self.x, params, out);
        for (o, y) in out.iter_mut().zip(self.y) {
            *o -= y;
        }
    }
}

/// Fit one spectrum from a caller-supplied guess and bounds.
///
/// Returns `Validation` for shape/length mismatches, `DegenerateFit` when the
/// window has non-finite samples, no positive signal or no degrees of
/// freedom, and `ConvergenceFailure` when the optimiser's answer is rejected.
/// Hitting the iteration cap is not an error: the result carries
/// [`FitStatus::IterationLimit`].
pub fn fit(
    axis: &SpectralAxis,
    spectrum: &Spectrum,
    background: Option<&Spectrum>,
    model: &LineModel<'_>,
    initial_guess: &[f64],
    bounds: &ParamBounds,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let layout = model.layout();
    layout.check_len(initial_guess)?;
    if bounds.len() != layout.len() || bounds.upper.len() != layout.len() {
        return Err(FitError::validation(format!(
            "bounds have {} entries, layout expects {}",
            bounds.len(),
            layout.len()
        )));
    }
    if model.unit() != axis.unit() {
        return Err(FitError::validation(format!(
            "model works in {} but the axis is in {}",
            model.unit().label(),
            axis.unit().label()
        )));
    }
    let prepared = prepare(axis, spectrum, background, options.fit_range)?;
    fit_prepared(axis, &prepared, model, initial_guess, bounds, options)
}

fn fit_prepared(
    axis: &SpectralAxis,
    prepared: &Prepared,
    model: &LineModel<'_>,
    initial_guess: &[f64],
    bounds: &ParamBounds,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let layout = model.layout();
    let complex = model.complex();
    let x = &axis.values()[prepared.window.clone()];
    let y = &prepared.values[prepared.window.clone()];
    let n = y.len();
    let p = layout.len();
    if n <= p {
        return Err(FitError::DegenerateFit(format!(
            "{n} samples in the fit window for {p} free parameters"
        )));
    }

    let scale = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(scale > 0.0) {
        return Err(FitError::DegenerateFit(
            "no positive signal in the fit window".to_string(),
        ));
    }

    // Amplitudes and the continuum are fit in units of the window peak.
    let unit_scale: Vec<f64> = (0..p)
        .map(|i| if layout.is_intensity(i) { scale } else { 1.0 })
        .collect();
    let normalise = |v: &[f64]| -> Vec<f64> { v.iter().zip(&unit_scale).map(|(v, s)| v / s).collect() };
    let guess = normalise(initial_guess);
    let scaled = ParamBounds {
        lower: normalise(&bounds.lower),
        upper: normalise(&bounds.upper),
    };
    let y_norm: Vec<f64> = y.iter().map(|v| v / scale).collect();

    let residuals = WindowResiduals {
        model,
        x,
        y: &y_norm,
    };
    let report = minimize(&residuals, &guess, &scaled.lower, &scaled.upper, &options.lm);
    trace!(
        iterations = report.iterations,
        termination = ?report.termination,
        ssr = report.ssr,
        "optimiser finished"
    );
    if report.termination == Termination::NonFinite {
        return Err(FitError::ConvergenceFailure(
            "model produced non-finite residuals at the initial guess".to_string(),
        ));
    }

    for (i, &value) in report.params.iter().enumerate() {
        let name = || layout.describe(i, complex.lines());
        match layout.kind(i) {
            ParamKind::Broadening(_) if !(value > 0.0) => {
                return Err(FitError::ConvergenceFailure(format!(
                    "{} = {value} is not positive",
                    name()
                )));
            }
            ParamKind::Amplitude(_) if value < 0.0 => {
                return Err(FitError::ConvergenceFailure(format!("{} = {value} is negative", name())));
            }
            _ => {}
        }
        if scaled.on_bound(i, value) {
            return Err(FitError::ConvergenceFailure(format!(
                "{} = {} sits on its bound",
                name(),
                value * unit_scale[i]
            )));
        }
    }

    let params: Vec<f64> = report.params.iter().zip(&unit_scale).map(|(v, s)| v * s).collect();
    let ssr = report.ssr * scale * scale;
    let dof = n - p;
    let sigma = noise_sigma(options.noise, axis, &prepared.values);
    let chi2 = ssr / dof as f64 / (sigma * sigma);
    if !chi2.is_finite() {
        return Err(FitError::ConvergenceFailure("reduced chi-squared is not finite".to_string()));
    }

    // Covariance s²(JᵀJ)⁺ in normalised units, then rescaled to data units.
    let covariance = pseudo_inverse(&normal_matrix(&report.jacobian)).map(|inv| {
        let s2 = report.ssr / dof as f64;
        DMatrix::from_fn(p, p, |i, j| inv[(i, j)] * s2 * unit_scale[i] * unit_scale[j])
    });
    let uncertainties: Vec<f64> = (0..p)
        .map(|i| match &covariance {
            Some(c) if c[(i, i)] >= 0.0 => c[(i, i)].sqrt(),
            _ => f64::NAN,
        })
        .collect();

    let decoded = model.decode(&params)?;
    let lines = decoded
        .lines
        .iter()
        .enumerate()
        .map(|(line, q)| LineFit {
            name: complex.lines()[line].name.clone(),
            velocity: q.velocity,
            velocity_err: uncertainties[layout.velocity_index(line)],
            broadening: q.broadening,
            broadening_err: uncertainties[layout.broadening_index(line)],
            amplitude: q.amplitude,
            amplitude_err: uncertainties[layout.amplitude_index(line)],
            flux: q.flux,
            flux_err: covariance
                .as_ref()
                .map_or(f64::NAN, |c| flux_error(model, line, &params, c)),
        })
        .collect();

    let (continuum, continuum_err) = match layout.continuum_index() {
        Some(i) => (params[i], uncertainties[i]),
        None => (0.0, 0.0),
    };

    let status = if report.termination.converged() {
        FitStatus::Converged
    } else {
        FitStatus::IterationLimit
    };

    Ok(FitResult {
        params,
        uncertainties,
        lines,
        continuum,
        continuum_err,
        chi2,
        ssr,
        dof,
        n_samples: n,
        iterations: report.iterations,
        status,
    })
}

/// Flux error by first-order propagation through the line's velocity,
/// broadening and amplitude.
fn flux_error(model: &LineModel<'_>, line: usize, params: &[f64], covariance: &DMatrix<f64>) -> f64 {
    let layout = model.layout();
    let indices = [
        layout.velocity_index(line),
        layout.broadening_index(line),
        layout.amplitude_index(line),
    ];
    let mut probe = params.to_vec();
    let base = model.line_flux(line, params);
    let gradient: Vec<f64> = indices
        .iter()
        .map(|&i| {
            let h = 1e-6 * params[i].abs().max(1e-3);
            probe[i] = params[i] + h;
            let d = (model.line_flux(line, &probe) - base) / h;
            probe[i] = params[i];
            d
        })
        .collect();

    let mut var = 0.0;
    for (a, &i) in indices.iter().enumerate() {
        for (b, &j) in indices.iter().enumerate() {
            var += gradient[a] * covariance[(i, j)] * gradient[b];
        }
    }
    if var >= 0.0 { var.sqrt() } else { f64::NAN }
}

/// Per-run fitting context: axis, line model, options and guess strategy.
#[derive(Debug, Clone)]
pub struct SpectrumFitter<'a> {
    axis: &'a SpectralAxis,
    complex: &'a LineComplex,
    shape: LineShape,
    redshift: f64,
    options: FitOptions,
    strategy: GuessStrategy<'a>,
}

impl<'a> SpectrumFitter<'a> {
    pub fn new(
        axis: &'a SpectralAxis,
        complex: &'a LineComplex,
        shape: LineShape,
        redshift: f64,
        options: FitOptions,
    ) -> Result<Self, FitError> {
        options.validate()?;
        if !(redshift.is_finite() && redshift > -1.0) {
            return Err(FitError::validation(format!("redshift must be > -1, got {redshift}")));
        }
        Ok(Self {
            axis,
            complex,
            shape,
            redshift,
            options,
            strategy: GuessStrategy::Heuristic,
        })
    }

    pub fn with_strategy(mut self, strategy: GuessStrategy<'a>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn axis(&self) -> &'a SpectralAxis {
        self.axis
    }

    pub fn complex(&self) -> &'a LineComplex {
        self.complex
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    pub fn model(&self) -> LineModel<'a> {
        LineModel::new(self.complex, self.shape, self.axis.unit(), self.redshift)
    }

    /// Guess, bound and fit one spectrum.
    pub fn fit_spectrum(&self, spectrum: &Spectrum, background: Option<&Spectrum>) -> Result<FitResult, FitError> {
        let model = self.model();
        let prepared = prepare(self.axis, spectrum, background, self.options.fit_range)?;
        let window_values = &prepared.values[prepared.window.clone()];
        let bounds = bounds(model.layout(), window_values, &self.options.bounds)?;
        let guess = initial_guess(
            &self.strategy,
            &model,
            &GuessInput {
                axis: self.axis,
                spectrum: &prepared.values,
                window: prepared.window.clone(),
                bounds: &bounds,
                default_broadening: self.options.default_broadening,
            },
        )?;
        fit_prepared(self.axis, &prepared, &model, &guess, &bounds, &self.options)
    }

    /// Best-fit model over the full spectral axis.
    pub fn model_spectrum(&self, fit: &FitResult) -> Result<Vec<f64>, FitError> {
        self.model().evaluate(self.axis.values(), &fit.params)
    }
}
