//! Berth Library
//!
//! Core modules for the berth deployment orchestrator.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod gates;
pub mod logs;
pub mod models;
pub mod notify;
pub mod providers;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
