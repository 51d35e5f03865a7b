//! Parameter-map JSON.
//!
//! Maps are stored row per `x`, column per `y`; pixels without a valid fit are
//! `null`. The run settings are echoed so a maps file documents how it was made.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::Serialize;

use crate::domain::{FitConfig, SpectralUnit};
use crate::error::AppError;
use crate::fit::{NoiseModel, RegionOutput, RegionSummary};
use crate::models::BoundsConfig;

type Grid = Vec<Vec<Option<f64>>>;

fn grid(m: &DMatrix<f64>) -> Grid {
    (0..m.nrows())
        .map(|x| {
            (0..m.ncols())
                .map(|y| {
                    let v = m[(x, y)];
                    v.is_finite().then_some(v)
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LineMapsFile {
    pub name: String,
    pub velocity: Grid,
    pub velocity_err: Grid,
    pub broadening: Grid,
    pub broadening_err: Grid,
    pub amplitude: Grid,
    pub amplitude_err: Grid,
    pub flux: Grid,
    pub flux_err: Grid,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    pub cube: String,
    pub model: String,
    pub sinc_width: Option<f64>,
    pub redshift: f64,
    pub fit_range: Option<(f64, f64)>,
    pub continuum: bool,
    pub noise: NoiseModel,
    pub bounds: BoundsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapsFile {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub unit: SpectralUnit,
    pub nx: usize,
    pub ny: usize,
    pub settings: RunSettings,
    pub summary: RegionSummary,
    pub lines: Vec<LineMapsFile>,
    pub chi2: Grid,
    pub continuum: Grid,
    pub valid: Vec<Vec<bool>>,
}

impl MapsFile {
    pub fn new(output: &RegionOutput, config: &FitConfig, unit: SpectralUnit, sinc_width: Option<f64>) -> Self {
        let lines = output
            .lines
            .iter()
            .map(|m| LineMapsFile {
                name: m.name.clone(),
                velocity: grid(&m.velocity),
                velocity_err: grid(&m.velocity_err),
                broadening: grid(&m.broadening),
                broadening_err: grid(&m.broadening_err),
                amplitude: grid(&m.amplitude),
                amplitude_err: grid(&m.amplitude_err),
                flux: grid(&m.flux),
                flux_err: grid(&m.flux_err),
            })
            .collect();
        let valid = (0..output.valid.nrows())
            .map(|x| (0..output.valid.ncols()).map(|y| output.valid[(x, y)]).collect())
            .collect();

        Self {
            tool: "linefit".to_string(),
            created: Utc::now(),
            unit,
            nx: output.shape.0,
            ny: output.shape.1,
            settings: RunSettings {
                cube: config.cube_path.display().to_string(),
                model: config.model.display_name().to_string(),
                sinc_width,
                redshift: config.redshift,
                fit_range: config.fit_range,
                continuum: config.continuum,
                noise: config.noise,
                bounds: config.bounds,
            },
            summary: output.summary.clone(),
            lines,
            chi2: grid(&output.chi2),
            continuum: grid(&output.continuum),
            valid,
        }
    }
}

/// Write parameter maps as pretty JSON.
pub fn write_maps_json(path: &Path, maps: &MapsFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create maps JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), maps)
        .map_err(|e| AppError::new(2, format!("Failed to write maps JSON: {e}")))?;
    Ok(())
}
