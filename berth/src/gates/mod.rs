//! Admission gates for the deployment pipeline

pub mod approval;
pub mod rate_limit;
