//! Data models

pub mod app;
pub mod approval;
pub mod delivery;
pub mod deployment;
pub mod pipeline;
pub mod release;
