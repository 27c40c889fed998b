//! Daemon assembly: options, state wiring and the run loop

pub mod options;
pub mod run;
pub mod state;
