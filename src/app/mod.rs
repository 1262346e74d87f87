//! Service lifecycle helpers.

pub mod shutdown;

pub use shutdown::{drain_in_flight, stop_background_task, InFlightGuard};
