//! Command-line parsing for the emission-line fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting code: `crate::app` turns the `*Args` structs into a `FitConfig`
//! and nothing downstream sees clap types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::cube::{Aggregate, RegionShape};
use crate::domain::{Filter, ModelKind};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "linefit", version, about = "Emission-line fitting for IFU spectral cubes")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. info, debug, linefit=trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every pixel of a region and write parameter maps.
    Fit(FitArgs),
    /// Fit a single pixel or an aggregated region spectrum.
    Spectrum(SpectrumArgs),
    /// Write a synthetic cube with known kinematics.
    Simulate(SimulateArgs),
}

fn parse_region(text: &str) -> Result<RegionShape, String> {
    RegionShape::parse(text).map_err(|e| e.to_string())
}

/// Options shared by `fit` and `spectrum`.
#[derive(Debug, Args, Clone)]
pub struct LineArgs {
    /// Cube JSON file (see `linefit simulate`).
    #[arg(long, value_name = "JSON")]
    pub cube: PathBuf,

    /// Comma-separated catalogue line names, e.g. NII6548,Halpha,NII6583.
    #[arg(long, value_delimiter = ',', required = true)]
    pub lines: Vec<String>,

    /// Tie group per line (defaults to one shared group).
    #[arg(long, value_delimiter = ',')]
    pub groups: Vec<usize>,

    /// Lines whose velocity is fit independently of their group.
    #[arg(long, value_delimiter = ',')]
    pub untie_velocity: Vec<String>,

    /// Lines whose broadening is fit independently of their group.
    #[arg(long, value_delimiter = ',')]
    pub untie_broadening: Vec<String>,

    #[arg(long, value_enum, default_value_t = ModelKind::Gaussian)]
    pub model: ModelKind,

    /// Sinc width in axis units (defaults to the value stored in the cube).
    #[arg(long)]
    pub sinc_width: Option<f64>,

    #[arg(long, default_value_t = 0.0)]
    pub redshift: f64,

    /// SITELLE filter preset for the fit range and noise window.
    #[arg(long, value_enum)]
    pub filter: Option<Filter>,

    /// Fit window as min,max in axis units (overrides --filter).
    #[arg(long, value_delimiter = ',')]
    pub fit_range: Option<Vec<f64>>,

    /// Fit a constant continuum term.
    #[arg(long)]
    pub continuum: bool,

    /// Known per-sample noise sigma for the reduced chi-squared.
    #[arg(long, conflicts_with = "noise_window")]
    pub noise_sigma: Option<f64>,

    /// Line-free window min,max used to estimate the noise (overrides --filter).
    #[arg(long, value_delimiter = ',')]
    pub noise_window: Option<Vec<f64>>,

    /// Velocity bound (km/s) either side of zero.
    #[arg(long, default_value_t = 2000.0)]
    pub max_velocity: f64,

    #[arg(long, default_value_t = 0.1)]
    pub min_broadening: f64,

    #[arg(long, default_value_t = 300.0)]
    pub max_broadening: f64,

    /// Amplitude upper bound as a multiple of the window peak.
    #[arg(long, default_value_t = 1.5)]
    pub amplitude_headroom: f64,

    /// Starting broadening (km/s) for the heuristic guess.
    #[arg(long, default_value_t = 10.0)]
    pub default_broadening: f64,

    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,

    /// Region(s) whose aggregated spectrum is subtracted as background.
    #[arg(long = "background", value_name = "REGION", value_parser = parse_region)]
    pub background: Vec<RegionShape>,

    /// How region spectra are combined.
    #[arg(long, value_enum, default_value_t = Aggregate::Mean)]
    pub aggregate: Aggregate,
}

/// Options for `linefit fit`.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub common: LineArgs,

    /// Pixels to fit: circle:x,y,r | box:x0,y0,x1,y1 | polygon:x1,y1,... (whole cube when omitted).
    #[arg(long, value_name = "REGION", value_parser = parse_region)]
    pub region: Vec<RegionShape>,

    /// Worker threads (defaults to all cores).
    #[arg(long, env = "LINEFIT_THREADS")]
    pub threads: Option<usize>,

    /// Keep pixels whose optimiser stopped on the iteration cap.
    #[arg(long)]
    pub accept_iteration_limit: bool,

    /// Write parameter maps as JSON.
    #[arg(long, value_name = "JSON")]
    pub export_maps: Option<PathBuf>,

    /// Write per-pixel results as CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,
}

/// Options for `linefit spectrum`.
#[derive(Debug, Parser, Clone)]
pub struct SpectrumArgs {
    #[command(flatten)]
    pub common: LineArgs,

    #[arg(long, requires = "y")]
    pub x: Option<usize>,

    #[arg(long, requires = "x")]
    pub y: Option<usize>,

    /// Aggregate these pixels instead of fitting a single one.
    #[arg(long, value_name = "REGION", value_parser = parse_region, conflicts_with = "x")]
    pub region: Vec<RegionShape>,

    /// Write axis, observed, model and residual as CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,
}

/// Options for `linefit simulate`.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Output cube JSON.
    #[arg(long, value_name = "JSON")]
    pub out: PathBuf,

    #[arg(long, value_delimiter = ',', default_value = "NII6548,Halpha,NII6583")]
    pub lines: Vec<String>,

    /// Peak amplitude per line.
    #[arg(long, value_delimiter = ',', default_value = "0.3,1.0,0.9")]
    pub amplitudes: Vec<f64>,

    #[arg(long, default_value_t = 16)]
    pub nx: usize,

    #[arg(long, default_value_t = 16)]
    pub ny: usize,

    #[arg(long, value_enum, default_value_t = ModelKind::Sincgauss)]
    pub model: ModelKind,

    #[arg(long, default_value_t = 0.0)]
    pub redshift: f64,

    /// Velocity at the cube centre (km/s).
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub velocity: f64,

    /// Velocity change per pixel along x (km/s).
    #[arg(long, default_value_t = 10.0, allow_hyphen_values = true)]
    pub gradient: f64,

    #[arg(long, default_value_t = 30.0)]
    pub broadening: f64,

    #[arg(long, default_value_t = 0.0)]
    pub continuum: f64,

    #[arg(long, default_value_t = 0.01)]
    pub noise: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Folding order (8 for SN3).
    #[arg(long, default_value_t = 8)]
    pub order: u32,

    /// Mirror step (nm).
    #[arg(long, default_value_t = 2943.0)]
    pub step_nm: f64,

    #[arg(long, default_value_t = 842)]
    pub n_steps: usize,

    #[arg(long, default_value_t = 169)]
    pub zpd_index: usize,

    /// Off-axis angle (degrees).
    #[arg(long, default_value_t = 11.96)]
    pub theta: f64,
}
