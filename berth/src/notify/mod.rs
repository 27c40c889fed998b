//! Deployment lifecycle notifications

pub mod channels;
pub mod event;
