// ABOUTME: Error types for sandbox lifecycle operations
// ABOUTME: Infrastructure failures propagate; orchestrator "not found" is an Option, never an error

use thiserror::Error;

/// Main error type for sandbox operations.
///
/// Object absence is deliberately not represented here: reads return
/// `Option` and deletes treat absence as success. Only infrastructure
/// failures and unrecoverable request problems surface as errors.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Cluster API errors (network, auth, rate limits, server faults)
    #[error("cluster API error: {0}")]
    Api(#[from] kube::Error),

    /// A sandbox object could not be created
    #[error("failed to create sandbox {id}: {reason}")]
    CreateFailed { id: String, reason: String },

    /// Malformed caller input that has no documented fallback
    #[error("invalid sandbox request: {0}")]
    InvalidRequest(String),
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
