/// Label of the baseline treatment arm.
pub const CONTROL_ARM: &str = "control";

/// Cumulative probabilities at which participants are asked for values.
pub const CANONICAL_PROBABILITIES: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

/// Date format of survey start dates and outcome tables.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Standardized scores below this are treated as inattentive participants.
pub const CUTOFF_STD: f64 = -3.0;

/// Minimum control rows per (date, question) cell for standardization.
pub const MIN_CONTROL_ROWS: usize = 2;

/// Number of grid points for the CRPS integral.
pub const CRPS_GRID_POINTS: usize = 50;

pub const EPSILON: f64 = 1e-12;
