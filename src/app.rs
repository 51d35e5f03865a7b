//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and sets up logging
//! - parses CLI arguments
//! - runs region or single-spectrum fits (see [`pipeline`])
//! - prints summaries and writes optional exports

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, FitArgs, LineArgs, SimulateArgs, SpectrumArgs};
use crate::data::{SimulationConfig, simulate_cube};
use crate::domain::{Filter, FitConfig};
use crate::error::AppError;
use crate::fit::NoiseModel;
use crate::models::{BoundsConfig, Instrument};

pub mod pipeline;

use pipeline::SpectrumTarget;

/// Entry point for the `linefit` binary.
pub fn run() -> Result<(), AppError> {
    // `.env` may carry RUST_LOG or LINEFIT_THREADS; a missing file is fine.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Spectrum(args) => handle_spectrum(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed (tests, embedding).
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_fit_args(&args)?;
    let run = pipeline::run_region_fit(&config)?;

    println!(
        "{}",
        crate::report::format_region_summary(&run.output, &config, run.axis.unit(), run.sinc_width)
    );

    if let Some(path) = &config.export_maps {
        let maps = crate::io::MapsFile::new(&run.output, &config, run.axis.unit(), run.sinc_width);
        crate::io::write_maps_json(path, &maps)?;
        info!(path = %path.display(), "wrote parameter maps");
    }
    if let Some(path) = &config.export_csv {
        crate::io::write_maps_csv(path, &run.output)?;
        info!(path = %path.display(), "wrote per-pixel CSV");
    }

    Ok(())
}

fn handle_spectrum(args: SpectrumArgs) -> Result<(), AppError> {
    let config = FitConfig {
        region: args.region.clone(),
        ..fit_config_from_args(&args.common)?
    };
    let target = match (args.x, args.y) {
        (Some(x), Some(y)) => SpectrumTarget::Pixel { x, y },
        _ => SpectrumTarget::Region,
    };
    let run = pipeline::run_spectrum_fit(&config, target)?;

    println!(
        "{}",
        crate::report::format_fit_summary(&run.fit, &config, run.axis.unit(), run.sinc_width)
    );

    if let Some(path) = &args.export_csv {
        crate::io::write_fit_csv(path, &run.axis, &run.spectrum, &run.model)?;
        info!(path = %path.display(), "wrote fit CSV");
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = simulation_config_from_args(&args);
    let sim = simulate_cube(&config)?;
    crate::io::write_cube_json(&args.out, &sim.cube, Some(sim.sinc_width))?;

    let axis = crate::cube::Cube::spectral_axis(&sim.cube);
    println!(
        "Wrote {}x{} cube with {} samples ({:.2}..{:.2} {}, sinc width {:.4}) to {}",
        config.nx,
        config.ny,
        axis.len(),
        axis.min(),
        axis.max(),
        axis.unit().label(),
        sim.sinc_width,
        args.out.display()
    );
    Ok(())
}

fn pair(values: &Option<Vec<f64>>, flag: &str) -> Result<Option<(f64, f64)>, AppError> {
    match values.as_deref() {
        None => Ok(None),
        Some(&[lo, hi]) if lo < hi => Ok(Some((lo, hi))),
        Some(v) => Err(AppError::new(
            2,
            format!("--{flag} expects min,max with min < max, got {v:?}"),
        )),
    }
}

/// Build the run configuration shared by `fit` and `spectrum`.
///
/// Explicit `--fit-range` / `--noise-*` flags win over a `--filter` preset.
pub fn fit_config_from_args(args: &LineArgs) -> Result<FitConfig, AppError> {
    let fit_range = pair(&args.fit_range, "fit-range")?.or(args.filter.map(Filter::fit_range));

    let noise = match (args.noise_sigma, pair(&args.noise_window, "noise-window")?) {
        (Some(sigma), _) => NoiseModel::Fixed { sigma },
        (None, Some((lower, upper))) => NoiseModel::Window { lower, upper },
        (None, None) => match args.filter {
            Some(filter) => {
                let (lower, upper) = filter.noise_window();
                NoiseModel::Window { lower, upper }
            }
            None => NoiseModel::Unit,
        },
    };

    Ok(FitConfig {
        cube_path: args.cube.clone(),
        lines: args.lines.clone(),
        groups: args.groups.clone(),
        untie_velocity: args.untie_velocity.clone(),
        untie_broadening: args.untie_broadening.clone(),
        model: args.model,
        sinc_width: args.sinc_width,
        redshift: args.redshift,
        fit_range,
        continuum: args.continuum,
        noise,
        bounds: BoundsConfig {
            max_velocity_offset: args.max_velocity,
            min_broadening: args.min_broadening,
            max_broadening: args.max_broadening,
            amplitude_headroom: args.amplitude_headroom,
        },
        default_broadening: args.default_broadening,
        max_iterations: args.max_iterations,

        region: Vec::new(),
        background_region: args.background.clone(),
        aggregate: args.aggregate,

        threads: None,
        accept_iteration_limit: false,

        export_maps: None,
        export_csv: None,
    })
}

pub fn fit_config_from_fit_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    Ok(FitConfig {
        region: args.region.clone(),
        threads: args.threads,
        accept_iteration_limit: args.accept_iteration_limit,
        export_maps: args.export_maps.clone(),
        export_csv: args.export_csv.clone(),
        ..fit_config_from_args(&args.common)?
    })
}

pub fn simulation_config_from_args(args: &SimulateArgs) -> SimulationConfig {
    SimulationConfig {
        nx: args.nx,
        ny: args.ny,
        instrument: Instrument {
            step_nm: args.step_nm,
            n_steps: args.n_steps,
            zpd_index: args.zpd_index,
            theta_deg: args.theta,
        },
        order: args.order,
        lines: args.lines.clone(),
        amplitudes: args.amplitudes.clone(),
        model: args.model,
        redshift: args.redshift,
        velocity: args.velocity,
        velocity_gradient: args.gradient,
        broadening: args.broadening,
        continuum: args.continuum,
        noise: args.noise,
        seed: args.seed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Command {
        let mut full = vec!["linefit"];
        full.extend_from_slice(argv);
        Cli::try_parse_from(full).unwrap().command
    }

    #[test]
    fn filter_preset_fills_range_and_noise() {
        let Command::Fit(args) = parse(&[
            "fit", "--cube", "c.json", "--lines", "NII6548,Halpha,NII6583", "--filter", "SN3",
            "--region", "circle:5,5,2",
        ]) else {
            panic!("expected fit");
        };
        let config = fit_config_from_fit_args(&args).unwrap();
        assert_eq!(config.lines.len(), 3);
        assert_eq!(config.fit_range, Some((14_500.0, 15_400.0)));
        assert_eq!(
            config.noise,
            NoiseModel::Window {
                lower: 14_300.0,
                upper: 14_500.0
            }
        );
        assert_eq!(config.region.len(), 1);
        assert_eq!(config.max_iterations, 200);
    }

    #[test]
    fn explicit_flags_override_filter() {
        let Command::Spectrum(args) = parse(&[
            "spectrum", "--cube", "c.json", "--lines", "Halpha", "--filter", "SN3", "--fit-range",
            "15000,15300", "--noise-sigma", "0.2", "--x", "1", "--y", "2",
        ]) else {
            panic!("expected spectrum");
        };
        let config = fit_config_from_args(&args.common).unwrap();
        assert_eq!(config.fit_range, Some((15_000.0, 15_300.0)));
        assert_eq!(config.noise, NoiseModel::Fixed { sigma: 0.2 });
    }

    #[test]
    fn comma_pairs_parse_and_malformed_pairs_fail() {
        let Command::Fit(args) = parse(&[
            "fit", "--cube", "c.json", "--lines", "Halpha", "--fit-range", "14900,15400", "--noise-window",
            "14300,14500",
        ]) else {
            panic!("expected fit");
        };
        let config = fit_config_from_fit_args(&args).unwrap();
        assert_eq!(config.fit_range, Some((14_900.0, 15_400.0)));
        assert_eq!(
            config.noise,
            NoiseModel::Window {
                lower: 14_300.0,
                upper: 14_500.0
            }
        );

        // Wrong arity parses but is refused when the config is built.
        for range in ["15000", "1,2,3"] {
            let Command::Fit(args) = parse(&["fit", "--cube", "c.json", "--lines", "Halpha", "--fit-range", range])
            else {
                panic!("expected fit");
            };
            assert_eq!(fit_config_from_fit_args(&args).unwrap_err().exit_code(), 2);
        }

        // Non-numeric values are a clap error, returned rather than exiting.
        let res = Cli::try_parse_from([
            "linefit", "fit", "--cube", "c.json", "--lines", "Halpha", "--noise-window", "low,high",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn logging_can_be_initialised_twice() {
        init_logging("debug");
        init_logging("info");
        info!("subscriber installed");
    }

    #[test]
    fn reversed_pairs_are_rejected() {
        let err = pair(&Some(vec![3.0, 1.0]), "fit-range").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(pair(&None, "fit-range").unwrap(), None);
    }

    #[test]
    fn simulate_then_fit_region_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let cube_path = dir.path().join("cube.json");
        let maps_path = dir.path().join("maps.json");

        let Command::Simulate(sim_args) = parse(&[
            "simulate",
            "--out",
            cube_path.to_str().unwrap(),
            "--nx",
            "3",
            "--ny",
            "2",
            "--noise",
            "0.005",
        ]) else {
            panic!("expected simulate");
        };
        handle_simulate(sim_args).unwrap();

        let Command::Fit(fit_args) = parse(&[
            "fit",
            "--cube",
            cube_path.to_str().unwrap(),
            "--lines",
            "NII6548,Halpha,NII6583",
            "--model",
            "sincgauss",
            "--filter",
            "SN3",
            "--threads",
            "2",
            "--export-maps",
            maps_path.to_str().unwrap(),
        ]) else {
            panic!("expected fit");
        };
        let config = fit_config_from_fit_args(&fit_args).unwrap();
        let run = pipeline::run_region_fit(&config).unwrap();
        assert_eq!(run.output.shape, (3, 2));
        assert_eq!(run.output.summary.requested, 6);
        assert_eq!(
            run.output.summary.fitted + run.output.summary.failed(),
            run.output.summary.requested
        );
        assert!(run.sinc_width.is_some());

        handle_fit(fit_args).unwrap();
        let text = std::fs::read_to_string(&maps_path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(json.is_object());
    }

    #[test]
    fn spectrum_without_target_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cube_path = dir.path().join("cube.json");
        let sim = simulate_cube(&SimulationConfig {
            nx: 2,
            ny: 2,
            ..SimulationConfig::default()
        })
        .unwrap();
        crate::io::write_cube_json(&cube_path, &sim.cube, Some(sim.sinc_width)).unwrap();

        let Command::Spectrum(args) = parse(&[
            "spectrum",
            "--cube",
            cube_path.to_str().unwrap(),
            "--lines",
            "Halpha",
        ]) else {
            panic!("expected spectrum");
        };
        let config = fit_config_from_args(&args.common).unwrap();
        let err = pipeline::run_spectrum_fit(&config, SpectrumTarget::Region).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
