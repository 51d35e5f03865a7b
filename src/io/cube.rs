//! Read/write cube JSON files.
//!
//! Cube JSON is the portable representation of a spectral cube:
//! - the spectral axis and its unit
//! - the spatial shape and the flattened samples (`x`-major, then `y`, then
//!   spectral; blank samples are written as `null`)
//! - the sinc width of the instrument, when known, so sincgauss fits need no
//!   extra flag

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cube::{Cube, DataCube};
use crate::domain::{SpectralAxis, SpectralUnit};
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeFile {
    pub tool: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    pub unit: SpectralUnit,
    pub axis: Vec<f64>,
    pub nx: usize,
    pub ny: usize,
    #[serde(default)]
    pub sinc_width: Option<f64>,
    pub data: Vec<Option<f64>>,
}

/// A cube plus the metadata carried alongside it.
#[derive(Debug, Clone)]
pub struct LoadedCube {
    pub cube: DataCube,
    pub sinc_width: Option<f64>,
}

impl CubeFile {
    pub fn from_cube(cube: &DataCube, sinc_width: Option<f64>) -> Self {
        let (nx, ny) = cube.spatial_shape();
        let axis = cube.spectral_axis();
        Self {
            tool: "linefit".to_string(),
            created: Some(Utc::now()),
            unit: axis.unit(),
            axis: axis.values().to_vec(),
            nx,
            ny,
            sinc_width,
            data: cube
                .data()
                .iter()
                .map(|v| v.is_finite().then_some(*v))
                .collect(),
        }
    }

    pub fn into_cube(self) -> Result<LoadedCube, AppError> {
        let axis = SpectralAxis::new(self.axis, self.unit)?;
        let data = self.data.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let cube = DataCube::new(self.nx, self.ny, axis, data)?;
        Ok(LoadedCube {
            cube,
            sinc_width: self.sinc_width,
        })
    }
}

/// Write a cube JSON file.
pub fn write_cube_json(path: &Path, cube: &DataCube, sinc_width: Option<f64>) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create cube JSON '{}': {e}", path.display())))?;
    serde_json::to_writer(BufWriter::new(file), &CubeFile::from_cube(cube, sinc_width))
        .map_err(|e| AppError::new(2, format!("Failed to write cube JSON: {e}")))?;
    Ok(())
}

/// Read a cube JSON file.
pub fn read_cube_json(path: &Path) -> Result<LoadedCube, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open cube JSON '{}': {e}", path.display())))?;
    let parsed: CubeFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid cube JSON '{}': {e}", path.display())))?;
    parsed.into_cube()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_json_round_trip_keeps_blanks() {
        let axis = SpectralAxis::linspace(100.0, 102.0, 3, SpectralUnit::Wavenumber).unwrap();
        let mut cube = DataCube::zeros(1, 2, axis).unwrap();
        cube.set_spectrum(0, 1, &[1.0, f64::NAN, 3.0]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.json");
        write_cube_json(&path, &cube, Some(2.5)).unwrap();
        let loaded = read_cube_json(&path).unwrap();

        assert_eq!(loaded.sinc_width, Some(2.5));
        let spectrum = loaded.cube.extract_spectrum(0, 1).unwrap();
        assert_eq!(spectrum.values()[0], 1.0);
        assert!(spectrum.values()[1].is_nan());
        assert_eq!(loaded.cube.spectral_axis().values(), &[100.0, 101.0, 102.0]);
    }

    #[test]
    fn malformed_cube_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"tool":"x","unit":"wavenumber","axis":[1.0,2.0],"nx":1,"ny":1,"data":[1.0]}"#,
        )
        .unwrap();
        let err = read_cube_json(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(read_cube_json(&dir.path().join("missing.json")).is_err());
    }
}
