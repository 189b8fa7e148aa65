//! Query admission against the ledger's current ceiling.
//!
//! Every evaluation issues a fresh dry run; estimates are never cached
//! because table sizes change between calls. The controller only reads the
//! ledger. Spend is recorded later, by the performance monitor, from the
//! job's billed bytes.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use tollgate_types::job::{CostEstimate, Query};
use tollgate_types::{GovernorError, Result};

use crate::gateway::WarehouseGateway;
use crate::ledger::BudgetLedger;

/// Reason attached to every decision whose dry run failed.
pub const ESTIMATE_UNAVAILABLE: &str = "estimate unavailable";

/// Why a dry run did not produce an estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimateFailure {
    /// The query is malformed or cannot be estimated.
    Invalid { message: String },
    /// The warehouse could not be reached or the call timed out.
    Unavailable { operation: String, message: String },
}

impl From<GovernorError> for EstimateFailure {
    fn from(err: GovernorError) -> Self {
        match err {
            GovernorError::EstimateFailed { message } => Self::Invalid { message },
            GovernorError::GatewayUnavailable { operation, message } => {
                Self::Unavailable { operation, message }
            }
            other => Self::Unavailable {
                operation: "dry_run".into(),
                message: other.to_string(),
            },
        }
    }
}

impl From<EstimateFailure> for GovernorError {
    fn from(cause: EstimateFailure) -> Self {
        match cause {
            EstimateFailure::Invalid { message } => GovernorError::EstimateFailed { message },
            EstimateFailure::Unavailable { operation, message } => {
                GovernorError::GatewayUnavailable { operation, message }
            }
        }
    }
}

impl fmt::Display for EstimateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { message } => write!(f, "invalid query: {message}"),
            Self::Unavailable { operation, message } => {
                write!(f, "warehouse unavailable during {operation}: {message}")
            }
        }
    }
}

/// Outcome category of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    /// The estimate exceeds the ceiling. A policy denial, not a fault.
    OverCeiling,
    /// The dry run failed; the query is denied without an estimate.
    EstimateUnavailable { cause: EstimateFailure },
}

/// Result of evaluating one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionDecision {
    pub approved: bool,
    pub estimate: Option<CostEstimate>,
    /// Ceiling in force at decision time.
    pub ceiling_usd: f64,
    pub reason: String,
    pub verdict: Verdict,
}

impl AdmissionDecision {
    fn approved(estimate: CostEstimate, ceiling_usd: f64) -> Self {
        Self {
            approved: true,
            estimate: Some(estimate),
            ceiling_usd,
            reason: format!(
                "estimated cost ${:.2} within current ceiling ${:.2}",
                estimate.estimated_cost_usd, ceiling_usd
            ),
            verdict: Verdict::Approved,
        }
    }

    fn over_ceiling(estimate: CostEstimate, ceiling_usd: f64) -> Self {
        Self {
            approved: false,
            estimate: Some(estimate),
            ceiling_usd,
            reason: format!(
                "estimated cost ${:.2} exceeds current ceiling ${:.2}",
                estimate.estimated_cost_usd, ceiling_usd
            ),
            verdict: Verdict::OverCeiling,
        }
    }

    fn unavailable(cause: EstimateFailure, ceiling_usd: f64) -> Self {
        Self {
            approved: false,
            estimate: None,
            ceiling_usd,
            reason: ESTIMATE_UNAVAILABLE.to_string(),
            verdict: Verdict::EstimateUnavailable { cause },
        }
    }

    /// `Ok(self)` when approved, otherwise the matching error:
    /// [`GovernorError::BudgetExhausted`] for a ceiling denial, and
    /// [`GovernorError::EstimateFailed`] or
    /// [`GovernorError::GatewayUnavailable`] for a failed dry run.
    pub fn into_result(self) -> Result<AdmissionDecision> {
        match self.verdict {
            Verdict::Approved => Ok(self),
            Verdict::OverCeiling => Err(GovernorError::BudgetExhausted {
                estimate_usd: self.estimate.map_or(0.0, |e| e.estimated_cost_usd),
                ceiling_usd: self.ceiling_usd,
            }),
            Verdict::EstimateUnavailable { cause } => Err(cause.into()),
        }
    }
}

/// Approves or denies queries by their dry-run estimate.
#[derive(Clone)]
pub struct AdmissionController {
    gateway: Arc<dyn WarehouseGateway>,
    ledger: Arc<BudgetLedger>,
}

impl AdmissionController {
    pub fn new(gateway: Arc<dyn WarehouseGateway>, ledger: Arc<BudgetLedger>) -> Self {
        Self { gateway, ledger }
    }

    /// Dry-run `query` and compare its estimate with the current ceiling.
    ///
    /// Approves iff `estimated_cost_usd <= ceiling`. Never mutates the
    /// ledger, and never approves a query whose estimate failed.
    pub async fn evaluate(&self, query: &Query) -> AdmissionDecision {
        let name = query.display_name();

        if query.sql.trim().is_empty() {
            let decision = AdmissionDecision::unavailable(
                EstimateFailure::Invalid {
                    message: "query text is empty".into(),
                },
                self.ledger.current_ceiling(),
            );
            warn!(query = %name, "rejected empty query");
            return decision;
        }

        let estimate = self.gateway.dry_run(query).await;
        let ceiling_usd = self.ledger.current_ceiling();

        let decision = match estimate {
            Ok(estimate) if estimate.estimated_cost_usd <= ceiling_usd => {
                AdmissionDecision::approved(estimate, ceiling_usd)
            }
            Ok(estimate) => AdmissionDecision::over_ceiling(estimate, ceiling_usd),
            Err(e) => {
                let cause = EstimateFailure::from(e);
                warn!(query = %name, cause = %cause, "dry run failed, denying");
                AdmissionDecision::unavailable(cause, ceiling_usd)
            }
        };

        match decision.verdict {
            Verdict::Approved => debug!(query = %name, reason = %decision.reason, "query approved"),
            Verdict::OverCeiling => info!(query = %name, reason = %decision.reason, "query denied"),
            Verdict::EstimateUnavailable { .. } => {}
        }
        decision
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("ceiling_usd", &self.ledger.current_ceiling())
            .finish()
    }
}
