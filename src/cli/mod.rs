//! Command-line layer: argument definitions, telemetry bootstrap, and
//! dispatch to the action the binary runs.

pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

mod start;

pub use self::start::start;
