//! HTTP route handlers.

pub mod export;
pub mod health;
pub mod metrics;
pub mod reevaluate;
