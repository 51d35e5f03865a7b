//! CSV exports.
//!
//! - per-pixel, per-line map values (one row per valid pixel and line)
//! - a single-spectrum fit (axis, observed, model, residual)
//!
//! Both are meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::{SpectralAxis, Spectrum};
use crate::error::AppError;
use crate::fit::RegionOutput;

fn write_err(e: std::io::Error) -> AppError {
    AppError::new(2, format!("Failed to write export CSV: {e}"))
}

fn create(path: &Path) -> Result<BufWriter<File>, AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    Ok(BufWriter::new(file))
}

/// Write one row per valid pixel and line.
pub fn write_maps_csv(path: &Path, output: &RegionOutput) -> Result<(), AppError> {
    let mut file = create(path)?;
    writeln!(
        file,
        "x,y,line,velocity,velocity_err,broadening,broadening_err,amplitude,amplitude_err,flux,flux_err,chi2,continuum"
    )
    .map_err(write_err)?;

    for x in 0..output.shape.0 {
        for y in 0..output.shape.1 {
            if !output.valid[(x, y)] {
                continue;
            }
            for m in &output.lines {
                writeln!(
                    file,
                    "{},{},{},{:.6},{:.6},{:.6},{:.6},{:.8e},{:.8e},{:.8e},{:.8e},{:.6},{:.8e}",
                    x,
                    y,
                    m.name,
                    m.velocity[(x, y)],
                    m.velocity_err[(x, y)],
                    m.broadening[(x, y)],
                    m.broadening_err[(x, y)],
                    m.amplitude[(x, y)],
                    m.amplitude_err[(x, y)],
                    m.flux[(x, y)],
                    m.flux_err[(x, y)],
                    output.chi2[(x, y)],
                    output.continuum[(x, y)],
                )
                .map_err(write_err)?;
            }
        }
    }
    file.flush().map_err(write_err)?;
    Ok(())
}

/// Write the observed spectrum next to the best-fit model.
pub fn write_fit_csv(path: &Path, axis: &SpectralAxis, observed: &Spectrum, model: &[f64]) -> Result<(), AppError> {
    if observed.len() != axis.len() || model.len() != axis.len() {
        return Err(AppError::new(2, "Spectrum, fit and axis lengths differ."));
    }
    let mut file = create(path)?;
    writeln!(file, "{},observed,model,residual", axis.unit().label()).map_err(write_err)?;
    for ((x, o), m) in axis.values().iter().zip(observed.values()).zip(model) {
        writeln!(file, "{x:.6},{o:.8e},{m:.8e},{:.8e}", o - m).map_err(write_err)?;
    }
    file.flush().map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{LineMaps, RegionSummary};
    use nalgebra::DMatrix;

    #[test]
    fn maps_csv_skips_invalid_pixels() {
        let filled = |v: f64| DMatrix::from_element(2, 1, v);
        let mut valid = DMatrix::from_element(2, 1, false);
        valid[(1, 0)] = true;
        let output = RegionOutput {
            shape: (2, 1),
            lines: vec![LineMaps {
                name: "Halpha".to_string(),
                velocity: filled(12.5),
                velocity_err: filled(0.5),
                broadening: filled(30.0),
                broadening_err: filled(1.0),
                amplitude: filled(2.0),
                amplitude_err: filled(0.1),
                flux: filled(7.0),
                flux_err: filled(0.3),
            }],
            chi2: filled(1.1),
            continuum: filled(0.0),
            valid,
            summary: RegionSummary::default(),
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maps.csv");
        write_maps_csv(&path, &output).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("x,y,line,velocity"));
        assert!(lines[1].starts_with("1,0,Halpha,12.500000,"));
    }
}
