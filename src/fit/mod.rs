//! Fitting orchestration.
//!
//! Responsibilities:
//!
//! - build initial guesses (heuristic, template or external predictor)
//! - fit a single spectrum with the bounded optimiser and derive line quantities
//! - fit every pixel of a masked region in parallel and assemble maps

pub mod fitter;
pub mod guess;
pub mod region;

pub use fitter::*;
pub use guess::*;
pub use region::*;
