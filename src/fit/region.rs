//! Region fitting: one independent fit per masked pixel, assembled into maps.
//!
//! Pixels are fit in parallel (rayon). Each worker returns its pixel
//! coordinate with either its fit result or the error, and a single
//! sequential pass writes them into the output maps, so the result does not
//! depend on scheduling. Pixels outside the mask or whose fit failed keep the
//! NaN sentinel and `valid = false`.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::cube::{Cube, check_mask};
use crate::domain::{FitResult, FitStatus, Spectrum};
use crate::error::{FailureKind, FitError};

use super::fitter::SpectrumFitter;

#[derive(Debug, Clone, Default)]
pub struct RegionOptions {
    /// Keep pixels whose optimiser stopped on the iteration cap.
    pub accept_iteration_limit: bool,
    /// Worker threads; rayon's global pool when `None`.
    pub threads: Option<usize>,
}

/// Parameter maps for one line.
#[derive(Debug, Clone)]
pub struct LineMaps {
    pub name: String,
    pub velocity: DMatrix<f64>,
    pub velocity_err: DMatrix<f64>,
    pub broadening: DMatrix<f64>,
    pub broadening_err: DMatrix<f64>,
    pub amplitude: DMatrix<f64>,
    pub amplitude_err: DMatrix<f64>,
    pub flux: DMatrix<f64>,
    pub flux_err: DMatrix<f64>,
}

impl LineMaps {
    fn new(name: &str, shape: (usize, usize)) -> Self {
        let nan = || DMatrix::from_element(shape.0, shape.1, f64::NAN);
        Self {
            name: name.to_string(),
            velocity: nan(),
            velocity_err: nan(),
            broadening: nan(),
            broadening_err: nan(),
            amplitude: nan(),
            amplitude_err: nan(),
            flux: nan(),
            flux_err: nan(),
        }
    }
}

/// Counts of what happened to the requested pixels.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegionSummary {
    pub requested: usize,
    pub fitted: usize,
    /// Pixels kept although the optimiser hit its iteration cap.
    pub iteration_limited: usize,
    pub failures: BTreeMap<FailureKind, usize>,
}

impl RegionSummary {
    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct RegionOutput {
    pub shape: (usize, usize),
    pub lines: Vec<LineMaps>,
    pub chi2: DMatrix<f64>,
    pub continuum: DMatrix<f64>,
    pub valid: DMatrix<bool>,
    pub summary: RegionSummary,
}

type PixelOutcome = (usize, usize, Result<FitResult, FitError>);

fn fit_pixel<C: Cube + ?Sized>(
    cube: &C,
    fitter: &SpectrumFitter<'_>,
    background: Option<&Spectrum>,
    x: usize,
    y: usize,
) -> PixelOutcome {
    let outcome = cube
        .extract_spectrum(x, y)
        .and_then(|spectrum| fitter.fit_spectrum(&spectrum, background));
    (x, y, outcome)
}

/// Fit every pixel selected by `mask`.
///
/// Recoverable per-pixel errors are tallied in the summary; a `Validation`
/// error from any pixel aborts the whole call.
pub fn fit_region<C: Cube + ?Sized>(
    cube: &C,
    fitter: &SpectrumFitter<'_>,
    mask: &DMatrix<bool>,
    background: Option<&Spectrum>,
    options: &RegionOptions,
) -> Result<RegionOutput, FitError> {
    let shape = cube.spatial_shape();
    check_mask(mask, shape)?;
    let axis = cube.spectral_axis();
    if fitter.axis() != axis {
        return Err(FitError::validation(
            "fitter and cube use different spectral axes",
        ));
    }
    if let Some(bg) = background {
        if bg.len() != axis.len() {
            return Err(FitError::validation(format!(
                "background has {} samples but the cube axis has {}",
                bg.len(),
                axis.len()
            )));
        }
    }

    let coords: Vec<(usize, usize)> = (0..shape.0)
        .flat_map(|x| (0..shape.1).map(move |y| (x, y)))
        .filter(|&(x, y)| mask[(x, y)])
        .collect();

    let run = || -> Vec<PixelOutcome> {
        coords
            .par_iter()
            .map(|&(x, y)| fit_pixel(cube, fitter, background, x, y))
            .collect()
    };
    let outcomes = match options.threads {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| FitError::validation(format!("cannot start {n} worker threads: {e}")))?
            .install(run),
        None => run(),
    };

    let mut output = RegionOutput {
        shape,
        lines: fitter
            .complex()
            .lines()
            .iter()
            .map(|l| LineMaps::new(&l.name, shape))
            .collect(),
        chi2: DMatrix::from_element(shape.0, shape.1, f64::NAN),
        continuum: DMatrix::from_element(shape.0, shape.1, f64::NAN),
        valid: DMatrix::from_element(shape.0, shape.1, false),
        summary: RegionSummary {
            requested: coords.len(),
            ..RegionSummary::default()
        },
    };

    for (x, y, outcome) in outcomes {
        let fit = match outcome {
            Ok(v) if v.status == FitStatus::IterationLimit && !options.accept_iteration_limit => {
                debug!(x, y, "pixel hit the iteration cap");
                *output
                    .summary
                    .failures
                    .entry(FailureKind::ConvergenceFailure)
                    .or_insert(0) += 1;
                continue;
            }
            Ok(v) => v,
            Err(e) if e.is_recoverable() => {
                debug!(x, y, error = %e, "pixel fit failed");
                *output.summary.failures.entry(e.kind()).or_insert(0) += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        if fit.status == FitStatus::IterationLimit {
            output.summary.iteration_limited += 1;
        }
        for (maps, line) in output.lines.iter_mut().zip(&fit.lines) {
            maps.velocity[(x, y)] = line.velocity;
            maps.velocity_err[(x, y)] = line.velocity_err;
            maps.broadening[(x, y)] = line.broadening;
            maps.broadening_err[(x, y)] = line.broadening_err;
            maps.amplitude[(x, y)] = line.amplitude;
            maps.amplitude_err[(x, y)] = line.amplitude_err;
            maps.flux[(x, y)] = line.flux;
            maps.flux_err[(x, y)] = line.flux_err;
        }
        output.chi2[(x, y)] = fit.chi2;
        output.continuum[(x, y)] = fit.continuum;
        output.valid[(x, y)] = true;
        output.summary.fitted += 1;
    }

    info!(
        requested = output.summary.requested,
        fitted = output.summary.fitted,
        failed = output.summary.failed(),
        "region fit complete"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{DataCube, RegionShape, rasterize};
    use crate::domain::{LineComplex, LineShape, SpectralAxis, SpectralUnit};
    use crate::fit::FitOptions;

    fn complex() -> LineComplex {
        let names: Vec<String> = ["OII3726", "OII3729"].iter().map(|s| s.to_string()).collect();
        LineComplex::from_names(&names, &[]).unwrap()
    }

    /// 4x3 cube with velocity = 10 · x km/s and a dead (all-zero) pixel at (3, 2).
    fn cube(complex: &LineComplex) -> DataCube {
        let axis = SpectralAxis::linspace(26_600.0, 27_100.0, 800, SpectralUnit::Wavenumber).unwrap();
        let mut cube = DataCube::zeros(4, 3, axis.clone()).unwrap();
        let fitter = SpectrumFitter::new(&axis, complex, LineShape::Gaussian, 0.0, FitOptions::default()).unwrap();
        let model = fitter.model();
        for x in 0..4 {
            for y in 0..3 {
                if (x, y) == (3, 2) {
                    continue;
                }
                let params = [10.0 * x as f64, 30.0, 4.0 + y as f64, 2.0];
                let spectrum = model.evaluate(axis.values(), &params).unwrap();
                cube.set_spectrum(x, y, &spectrum).unwrap();
            }
        }
        cube
    }

    #[test]
    fn maps_follow_the_pixels() {
        let complex = complex();
        let cube = cube(&complex);
        let fitter =
            SpectrumFitter::new(cube.spectral_axis(), &complex, LineShape::Gaussian, 0.0, FitOptions::default())
                .unwrap();
        let mask = DMatrix::from_element(4, 3, true);
        let out = fit_region(&cube, &fitter, &mask, None, &RegionOptions::default()).unwrap();

        assert_eq!(out.summary.requested, 12);
        assert_eq!(out.summary.fitted, 11);
        assert_eq!(out.summary.failures.get(&FailureKind::DegenerateFit), Some(&1));
        assert!(!out.valid[(3, 2)]);
        assert!(out.lines[0].velocity[(3, 2)].is_nan());

        for x in 0..4 {
            for y in 0..3 {
                if (x, y) == (3, 2) {
                    continue;
                }
                assert!(out.valid[(x, y)]);
                assert!((out.lines[0].velocity[(x, y)] - 10.0 * x as f64).abs() < 1e-3);
                assert!((out.lines[0].amplitude[(x, y)] - (4.0 + y as f64)).abs() < 1e-3);
                assert_eq!(out.lines[0].velocity[(x, y)], out.lines[1].velocity[(x, y)]);
            }
        }
    }

    #[test]
    fn masked_out_pixels_are_nan() {
        let complex = complex();
        let cube = cube(&complex);
        let fitter =
            SpectrumFitter::new(cube.spectral_axis(), &complex, LineShape::Gaussian, 0.0, FitOptions::default())
                .unwrap();
        let mask = rasterize(
            &[RegionShape::Box {
                x0: 0.0,
                y0: 0.0,
                x1: 1.0,
                y1: 0.0,
            }],
            (4, 3),
        )
        .unwrap();
        let options = RegionOptions {
            threads: Some(2),
            ..RegionOptions::default()
        };
        let out = fit_region(&cube, &fitter, &mask, None, &options).unwrap();
        assert_eq!(out.summary.requested, 2);
        assert_eq!(out.summary.fitted, 2);
        assert_eq!(out.valid.iter().filter(|v| **v).count(), 2);
        assert!(out.chi2[(2, 2)].is_nan());
    }

    #[test]
    fn results_do_not_depend_on_thread_count() {
        let complex = complex();
        let cube = cube(&complex);
        let fitter =
            SpectrumFitter::new(cube.spectral_axis(), &complex, LineShape::Gaussian, 0.0, FitOptions::default())
                .unwrap();
        let mask = DMatrix::from_element(4, 3, true);
        let one = fit_region(&cube, &fitter, &mask, None, &RegionOptions { threads: Some(1), ..Default::default() })
            .unwrap();
        let four = fit_region(&cube, &fitter, &mask, None, &RegionOptions { threads: Some(4), ..Default::default() })
            .unwrap();
        assert_eq!(one.valid, four.valid);
        for (a, b) in one.lines[0].velocity.iter().zip(four.lines[0].velocity.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }

    #[test]
    fn validation_errors_abort() {
        let complex = complex();
        let cube = cube(&complex);
        let fitter =
            SpectrumFitter::new(cube.spectral_axis(), &complex, LineShape::Gaussian, 0.0, FitOptions::default())
                .unwrap();
        let wrong_mask = DMatrix::from_element(3, 3, true);
        assert!(matches!(
            fit_region(&cube, &fitter, &wrong_mask, None, &RegionOptions::default()),
            Err(FitError::Validation(_))
        ));

        let mask = DMatrix::from_element(4, 3, true);
        let short = Spectrum::zeros(5);
        assert!(matches!(
            fit_region(&cube, &fitter, &mask, Some(&short), &RegionOptions::default()),
            Err(FitError::Validation(_))
        ));
    }

    #[test]
    fn empty_mask_fits_nothing() {
        let complex = complex();
        let cube = cube(&complex);
        let fitter =
            SpectrumFitter::new(cube.spectral_axis(), &complex, LineShape::Gaussian, 0.0, FitOptions::default())
                .unwrap();
        let mask = DMatrix::from_element(4, 3, false);
        let out = fit_region(&cube, &fitter, &mask, None, &RegionOptions::default()).unwrap();
        assert_eq!(out.summary.requested, 0);
        assert_eq!(out.summary.fitted, 0);
        assert!(out.valid.iter().all(|v| !*v));
        assert!(out.chi2.iter().all(|v| v.is_nan()));
        assert!(out.lines.iter().all(|m| m.velocity.iter().all(|v| v.is_nan())));
    }

    #[test]
    fn all_zero_cube_is_degenerate_everywhere() {
        let complex = complex();
        let axis = SpectralAxis::linspace(26_600.0, 27_100.0, 800, SpectralUnit::Wavenumber).unwrap();
        let cube = DataCube::zeros(2, 2, axis).unwrap();
        let fitter =
            SpectrumFitter::new(cube.spectral_axis(), &complex, LineShape::Gaussian, 0.0, FitOptions::default())
                .unwrap();
        let mask = DMatrix::from_element(2, 2, true);
        let out = fit_region(&cube, &fitter, &mask, None, &RegionOptions::default()).unwrap();
        assert_eq!(out.summary.fitted, 0);
        assert_eq!(out.summary.failures.get(&FailureKind::DegenerateFit), Some(&4));
        assert!(out.valid.iter().all(|v| !*v));
    }
}
