//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - spectral axes, spectra and the line-shape tags (`SpectralAxis`, `Spectrum`, `LineShape`)
//! - the line catalogue and line complexes (`LineDefinition`, `LineComplex`)
//! - fit outputs (`FitResult`, `LineFit`) and the run configuration (`FitConfig`)

pub mod lines;
pub mod types;

pub use lines::*;
pub use types::*;
