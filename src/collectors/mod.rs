pub mod api;
pub mod endpoint;
pub mod fleet;
pub mod walker;

use crate::records::{EndpointHealthRecord, InventoryBatch};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("connection to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },
    #[error("authentication against {endpoint} rejected: {message}")]
    Auth { endpoint: String, message: String },
    #[error("inventory walk on {endpoint} failed: {message}")]
    Walk { endpoint: String, message: String },
    #[error("{endpoint} did not finish within {secs}s")]
    Timeout { endpoint: String, secs: u64 },
}

impl CollectError {
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Connect { .. } => "connect",
            CollectError::Auth { .. } => "auth",
            CollectError::Walk { .. } => "walk",
            CollectError::Timeout { .. } => "timeout",
        }
    }
}

/// Result of one endpoint. A failed endpoint carries only its error health record,
/// never partial inventory.
#[derive(Debug)]
pub enum EndpointOutcome {
    Collected(InventoryBatch),
    Failed {
        health: EndpointHealthRecord,
        error: CollectError,
    },
}
