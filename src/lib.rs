#![deny(unreachable_pub)]

// Core modules
mod consts;
mod errors;

// Feature modules
pub mod experiment;

// Re-exports
pub use consts::{
    CANONICAL_PROBABILITIES, CONTROL_ARM, CRPS_GRID_POINTS, CUTOFF_STD, DATE_FORMAT, EPSILON,
    MIN_CONTROL_ROWS,
};
pub use errors::{ControlShortfall, Error, Result, StoreError};
pub use experiment::*;
