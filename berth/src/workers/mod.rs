//! Background workers

pub mod notifier;
pub mod reaper;
