//! Reporting utilities: map statistics and formatted terminal output.

pub mod format;

pub use format::*;

use nalgebra::DMatrix;

use crate::fit::RegionOutput;

/// Robust summary of the valid pixels of one map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapStats {
    pub n: usize,
    pub median: f64,
    pub p16: f64,
    pub p84: f64,
}

/// Linear-interpolated percentile of sorted values, `q` in `[0, 1]`.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Statistics over the pixels flagged in `valid`; `None` when none are.
pub fn map_stats(map: &DMatrix<f64>, valid: &DMatrix<bool>) -> Option<MapStats> {
    let mut values: Vec<f64> = map
        .iter()
        .zip(valid.iter())
        .filter(|(v, ok)| **ok && v.is_finite())
        .map(|(v, _)| *v)
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(MapStats {
        n: values.len(),
        median: percentile(&values, 0.5),
        p16: percentile(&values, 0.16),
        p84: percentile(&values, 0.84),
    })
}

/// Per-line velocity, broadening and flux statistics.
#[derive(Debug, Clone)]
pub struct LineStats {
    pub name: String,
    pub velocity: Option<MapStats>,
    pub broadening: Option<MapStats>,
    pub flux: Option<MapStats>,
}

pub fn line_stats(output: &RegionOutput) -> Vec<LineStats> {
    output
        .lines
        .iter()
        .map(|m| LineStats {
            name: m.name.clone(),
            velocity: map_stats(&m.velocity, &output.valid),
            broadening: map_stats(&m.broadening, &output.valid),
            flux: map_stats(&m.flux, &output.valid),
        })
        .collect()
}
