//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{FitConfig, FitResult, FitStatus, SpectralUnit};
use crate::error::FailureKind;
use crate::fit::RegionOutput;

use super::{MapStats, line_stats};

fn fmt_err(v: f64) -> String {
    if v.is_finite() { format!("{v:.3}") } else { "n/a".to_string() }
}

fn fmt_stats(stats: Option<MapStats>) -> String {
    match stats {
        Some(s) => format!("{:.2} [{:.2}, {:.2}]", s.median, s.p16, s.p84),
        None => "-".to_string(),
    }
}

fn header(out: &mut String, config: &FitConfig, unit: SpectralUnit, sinc_width: Option<f64>) {
    out.push_str("=== linefit - emission-line fit ===\n");
    out.push_str(&format!("Cube: {}\n", config.cube_path.display()));
    out.push_str(&format!("Lines: {}\n", config.lines.join(", ")));
    out.push_str(&format!("Model: {}", config.model.display_name()));
    if let Some(w) = sinc_width {
        out.push_str(&format!(" (sinc width {w:.4} {})", unit.label()));
    }
    out.push('\n');
    out.push_str(&format!("Redshift: {}\n", config.redshift));
    if let Some((lo, hi)) = config.fit_range {
        out.push_str(&format!("Fit range: [{lo}, {hi}] {}\n", unit.label()));
    }
}

/// Summary of a single-spectrum fit.
pub fn format_fit_summary(
    fit: &FitResult,
    config: &FitConfig,
    unit: SpectralUnit,
    sinc_width: Option<f64>,
) -> String {
    let mut out = String::new();
    header(&mut out, config, unit, sinc_width);

    let status = match fit.status {
        FitStatus::Converged => "converged",
        FitStatus::IterationLimit => "iteration limit",
    };
    out.push_str(&format!(
        "\nStatus: {status} after {} iterations | chi2_red={:.4} | n={} dof={}\n",
        fit.iterations, fit.chi2, fit.n_samples, fit.dof
    ));

    out.push_str("\nLine        velocity (km/s)        broadening (km/s)      amplitude            flux\n");
    for l in &fit.lines {
        out.push_str(&format!(
            "{:<11} {:>9.3} ± {:<9}  {:>9.3} ± {:<9}  {:>9.4e} ± {:<9}  {:>9.4e} ± {}\n",
            l.name,
            l.velocity,
            fmt_err(l.velocity_err),
            l.broadening,
            fmt_err(l.broadening_err),
            l.amplitude,
            fmt_err(l.amplitude_err),
            l.flux,
            fmt_err(l.flux_err),
        ));
    }
    if config.continuum {
        out.push_str(&format!(
            "Continuum: {:.4e} ± {}\n",
            fit.continuum,
            fmt_err(fit.continuum_err)
        ));
    }
    out
}

/// Summary of a region fit: counts, failure tallies and map statistics.
pub fn format_region_summary(
    output: &RegionOutput,
    config: &FitConfig,
    unit: SpectralUnit,
    sinc_width: Option<f64>,
) -> String {
    let mut out = String::new();
    header(&mut out, config, unit, sinc_width);

    let s = &output.summary;
    out.push_str(&format!(
        "\nPixels: requested={} fitted={} failed={}",
        s.requested,
        s.fitted,
        s.failed()
    ));
    if s.iteration_limited > 0 {
        out.push_str(&format!(" (iteration-limited kept: {})", s.iteration_limited));
    }
    out.push('\n');
    for kind in FailureKind::RECOVERABLE {
        if let Some(n) = s.failures.get(&kind) {
            out.push_str(&format!("  {}: {n}\n", kind.label()));
        }
    }

    out.push_str("\nMedian [16th, 84th percentile] over fitted pixels:\n");
    out.push_str("Line        velocity (km/s)            broadening (km/s)          flux\n");
    for l in line_stats(output) {
        out.push_str(&format!(
            "{:<11} {:<26} {:<26} {}\n",
            l.name,
            fmt_stats(l.velocity),
            fmt_stats(l.broadening),
            fmt_stats(l.flux),
        ));
    }
    out
}
