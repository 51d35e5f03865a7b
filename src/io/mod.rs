//! Input/output helpers.
//!
//! - cube JSON read/write (`cube`)
//! - parameter-map JSON (`maps`)
//! - CSV exports (`export`)

pub mod cube;
pub mod export;
pub mod maps;

pub use cube::*;
pub use export::*;
pub use maps::*;
