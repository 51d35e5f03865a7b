//! `ifu-linefit` library crate.
//!
//! Emission-line fitting for integral-field spectral cubes: Gaussian and
//! sinc-convolved Gaussian line profiles, bounded Levenberg-Marquardt fits of
//! tied line complexes, and parallel per-pixel region fitting into parameter
//! maps.
//!
//! The binary (`linefit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fitting engine can be driven from other front-ends

pub mod app;
pub mod cli;
pub mod cube;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
