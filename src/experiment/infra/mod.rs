//! Infrastructure shared by the experiment components.

pub mod logging;
pub mod persist;

pub use logging::{init_logging, targets, LogConfig, LogFormat};
pub use persist::{read_json, write_json_atomic};
