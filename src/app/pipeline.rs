//! Shared "fit pipeline" logic used by the `fit` and `spectrum` commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! cube load -> line complex -> line shape -> background -> fit
//!
//! The command handlers can then focus on presentation and exports.

use nalgebra::DMatrix;
use tracing::info;

use crate::cube::{Cube, rasterize};
use crate::domain::{FitConfig, FitResult, LineComplex, LineShape, SpectralAxis, Spectrum};
use crate::error::AppError;
use crate::fit::{FitOptions, RegionOptions, RegionOutput, SpectrumFitter, fit_region};
use crate::io::{LoadedCube, read_cube_json};
use crate::math::LmConfig;

/// Line complex with the requested groups, untied lines and continuum.
pub fn build_complex(config: &FitConfig) -> Result<LineComplex, AppError> {
    let mut complex = LineComplex::from_names(&config.lines, &config.groups)?;
    for name in &config.untie_velocity {
        complex = complex.untie(name, true, false)?;
    }
    for name in &config.untie_broadening {
        complex = complex.untie(name, false, true)?;
    }
    Ok(complex.with_continuum(config.continuum))
}

pub fn build_options(config: &FitConfig) -> FitOptions {
    FitOptions {
        fit_range: config.fit_range,
        noise: config.noise,
        bounds: config.bounds,
        default_broadening: config.default_broadening,
        lm: LmConfig {
            max_iterations: config.max_iterations,
            ..LmConfig::default()
        },
    }
}

/// Inputs every fit command needs once the cube is loaded.
#[derive(Debug)]
pub struct PreparedRun {
    pub loaded: LoadedCube,
    pub complex: LineComplex,
    pub shape: LineShape,
    /// Sinc width actually used (flag first, then the cube file).
    pub sinc_width: Option<f64>,
    pub options: FitOptions,
    pub background: Option<Spectrum>,
}

pub fn prepare_run(config: &FitConfig) -> Result<PreparedRun, AppError> {
    let loaded = read_cube_json(&config.cube_path)?;
    let complex = build_complex(config)?;
    let sinc_width = config.sinc_width.or(loaded.sinc_width);
    let shape = config.model.shape(sinc_width)?;
    let options = build_options(config);
    options.validate()?;

    let background = if config.background_region.is_empty() {
        None
    } else {
        let mask = rasterize(&config.background_region, loaded.cube.spatial_shape())?;
        let (_, spectrum) = loaded.cube.extract_spectrum_region(&mask, config.aggregate)?;
        info!(pixels = mask.iter().filter(|m| **m).count(), "background spectrum extracted");
        Some(spectrum)
    };

    Ok(PreparedRun {
        loaded,
        complex,
        shape,
        sinc_width,
        options,
        background,
    })
}

/// All computed outputs of a `linefit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub output: RegionOutput,
    pub axis: SpectralAxis,
    pub sinc_width: Option<f64>,
}

/// Fit every pixel of the configured region (the whole cube when empty).
pub fn run_region_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let run = prepare_run(config)?;
    let cube = &run.loaded.cube;
    let (nx, ny) = cube.spatial_shape();
    let mask = if config.region.is_empty() {
        DMatrix::from_element(nx, ny, true)
    } else {
        rasterize(&config.region, (nx, ny))?
    };

    let fitter = SpectrumFitter::new(
        cube.spectral_axis(),
        &run.complex,
        run.shape,
        config.redshift,
        run.options.clone(),
    )?;
    let region_options = RegionOptions {
        accept_iteration_limit: config.accept_iteration_limit,
        threads: config.threads,
    };
    let output = fit_region(cube, &fitter, &mask, run.background.as_ref(), &region_options)?;

    Ok(RunOutput {
        output,
        axis: cube.spectral_axis().clone(),
        sinc_width: run.sinc_width,
    })
}

/// Which spectrum `linefit spectrum` fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumTarget {
    Pixel { x: usize, y: usize },
    /// Aggregate of `FitConfig::region`.
    Region,
}

#[derive(Debug, Clone)]
pub struct SpectrumOutput {
    pub axis: SpectralAxis,
    /// Spectrum that was fitted, background already removed.
    pub spectrum: Spectrum,
    pub fit: FitResult,
    /// Best-fit model over the full axis.
    pub model: Vec<f64>,
    pub sinc_width: Option<f64>,
}

pub fn run_spectrum_fit(config: &FitConfig, target: SpectrumTarget) -> Result<SpectrumOutput, AppError> {
    let run = prepare_run(config)?;
    let cube = &run.loaded.cube;

    let spectrum = match target {
        SpectrumTarget::Pixel { x, y } => cube.extract_spectrum(x, y)?,
        SpectrumTarget::Region => {
            if config.region.is_empty() {
                return Err(AppError::new(2, "Provide --x/--y or at least one --region."));
            }
            let mask = rasterize(&config.region, cube.spatial_shape())?;
            cube.extract_spectrum_region(&mask, config.aggregate)?.1
        }
    };

    let fitter = SpectrumFitter::new(
        cube.spectral_axis(),
        &run.complex,
        run.shape,
        config.redshift,
        run.options.clone(),
    )?;
    let fit = fitter.fit_spectrum(&spectrum, run.background.as_ref())?;
    let model = fitter.model_spectrum(&fit)?;
    let spectrum = match &run.background {
        Some(bg) => spectrum.subtract(bg)?,
        None => spectrum,
    };

    Ok(SpectrumOutput {
        axis: cube.spectral_axis().clone(),
        spectrum,
        fit,
        model,
        sinc_width: run.sinc_width,
    })
}
