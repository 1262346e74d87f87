//! Status server data structures.

use crate::service::Database;

/// Shared state for the status server handlers.
#[derive(Clone)]
pub struct StatusState {
    pub db: Database,
}

impl StatusState {
    pub fn new(db: Database) -> Self {
        StatusState { db }
    }
}
