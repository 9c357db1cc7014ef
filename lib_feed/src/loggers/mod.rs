/// Installs the fern console/file logger and rotates old log files.
pub mod logger_setup;

pub use logger_setup::*;
