//! Deployment orchestration

pub mod fsm;
pub mod hooks;
pub mod manager;
pub(crate) mod pipeline;
pub mod versions;
