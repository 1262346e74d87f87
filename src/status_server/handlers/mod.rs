//! Status server HTTP handlers.

mod health;
mod metrics;

pub use health::{details_handler, health_handler};
pub use metrics::metrics_handler;
