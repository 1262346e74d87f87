//! Process-level setup used by the binary.

mod logger;

pub use logger::init_logger_with;
