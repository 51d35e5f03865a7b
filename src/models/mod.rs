//! Line models.
//!
//! - `params`: parameter vector layout, encoding and bounds
//! - `model`: evaluation of a line complex over an axis
//! - `instrument`: sinc width and native axis of an FTS cube

pub mod instrument;
pub mod model;
pub mod params;

pub use instrument::*;
pub use model::*;
pub use params::*;
