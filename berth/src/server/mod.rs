//! HTTP listener: webhook ingestion and control endpoints

pub mod handlers;
pub mod ingest;
pub mod serve;
pub mod signature;
pub mod state;
