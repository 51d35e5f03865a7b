//! Mathematical utilities: line profiles, linear solves and the bounded
//! Levenberg–Marquardt optimiser.

pub mod lm;
pub mod ols;
pub mod profile;

pub use lm::*;
pub use ols::*;
pub use profile::*;
