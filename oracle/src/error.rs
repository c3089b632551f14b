//! Errors surfaced by the delivery oracle.

use thiserror::Error;

/// Errors that can occur while provisioning accounts, submitting payments, or verifying delivery.
#[derive(Debug, Error)]
pub enum Error {
    /// Ledger interaction failed without being retried
    #[error("ledger error: {0}")]
    Ledger(#[from] herald_ledger::Error),

    /// A submission failed on every attempt
    #[error("submission failed after {attempts} attempts (last hash: {}): {source}", .hash.as_deref().unwrap_or("none"))]
    Exhausted {
        hash: Option<String>,
        attempts: usize,
        source: herald_ledger::Error,
    },

    /// A provisioning batch could not be submitted
    #[error("provisioning batch {batch} failed ({created} accounts already created)")]
    Provision {
        batch: usize,
        created: usize,
        source: Box<Error>,
    },

    /// No account other than the sender is available to receive a payment
    #[error("no receiver available for sender {sender}")]
    NoReceiver { sender: String },

    /// Two payments generated for the same batch share a hash
    #[error("duplicate transaction hash in batch: {0}")]
    DuplicateHash(String),

    /// Configuration is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Payment submissions exhausted their retries during a batch
    #[error("batch {batch}: {failed} submissions failed")]
    Submissions { batch: usize, failed: usize },

    /// Notifications were still missing once the settle window elapsed
    #[error("batch {batch}: {missing} notifications missing after settle window")]
    Verification { batch: usize, missing: usize },

    /// Persisting provisioned keypairs failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding provisioned keypairs failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
