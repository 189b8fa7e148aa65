//! Error types for tollgate.
//!
//! [`GovernorError`] is the single error taxonomy shared by the gateway,
//! the aggregator, the admission controller and configuration loading.
//! It is non-exhaustive to allow future extension without breaking
//! downstream.

use thiserror::Error;

use crate::record::{RecordKey, TableKind};

/// Top-level error type for tollgate.
///
/// Variants are grouped into recoverable (transport), surfaced (estimate,
/// partial write, policy) and fatal (configuration) categories so callers
/// can decide whether retrying is worthwhile.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GovernorError {
    // ── Recoverable ──────────────────────────────────────────────────

    /// Transport failure or timeout talking to the warehouse.
    ///
    /// Retried for bulk writes only; dry runs and executions surface it.
    #[error("warehouse unavailable during {operation}: {message}")]
    GatewayUnavailable {
        /// Gateway call that failed (`bulk_write`, `dry_run`, `execute`).
        operation: String,
        /// Transport-level detail.
        message: String,
    },

    // ── Surfaced ─────────────────────────────────────────────────────

    /// The query is malformed or its cost cannot be estimated.
    #[error("cost estimate failed: {message}")]
    EstimateFailed {
        /// Warehouse-supplied reason.
        message: String,
    },

    /// Some records in a bulk write were rejected by the warehouse.
    #[error("{} record(s) rejected writing to {table}", .failed_keys.len())]
    WritePartialFailure {
        /// Destination table of the partition.
        table: TableKind,
        /// Idempotency keys of the rejected records.
        failed_keys: Vec<RecordKey>,
    },

    /// The query was denied by the budget policy. Not a fault.
    #[error("estimated cost ${estimate_usd:.2} exceeds current ceiling ${ceiling_usd:.2}")]
    BudgetExhausted {
        /// Dry-run cost estimate in USD.
        estimate_usd: f64,
        /// Ceiling in force when the query was evaluated.
        ceiling_usd: f64,
    },

    /// The aggregator's flush channel has been closed (service stopped).
    #[error("ingestion pipeline is shut down")]
    Shutdown,

    // ── Fatal ────────────────────────────────────────────────────────

    /// Configuration is malformed or semantically invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GovernorError {
    /// Shorthand for a [`GovernorError::GatewayUnavailable`].
    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GatewayUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`GovernorError::EstimateFailed`].
    pub fn estimate_failed(message: impl Into<String>) -> Self {
        Self::EstimateFailed {
            message: message.into(),
        }
    }

    /// Whether a bulk write that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable { .. })
    }

    /// Whether this is a policy denial rather than a failure.
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, Self::BudgetExhausted { .. })
    }
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GovernorError>;
