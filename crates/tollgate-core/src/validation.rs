//! Configuration validation.
//!
//! Post-deserialization validation for [`GovernorConfig`]. Serde handles
//! structural correctness and defaults, but cannot enforce semantic
//! constraints like "the budget must be positive" or "thresholds must be
//! ordered." This module fills that gap.
//!
//! Validation runs before the governor is constructed. Any diagnostic with
//! [`ValidationSeverity::Error`] makes construction fail with
//! `GovernorError::InvalidConfiguration`.

use tollgate_types::GovernorError;
use tollgate_types::config::{BatchConfig, BudgetConfig, GatewayConfig, GovernorConfig};

/// Retry counts above this are accepted but flagged.
const RETRY_COUNT_WARN_ABOVE: u32 = 10;

// ── ValidationSeverity ──────────────────────────────────────────────────

/// Severity level for a validation diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Fatal: the governor cannot start.
    Error,
    /// Non-fatal: valid, but probably not what the operator meant.
    Warning,
}

// ── ValidationError ─────────────────────────────────────────────────────

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Dotted field path (e.g. `"budget.warning_utilization_pct"`).
    pub field: String,
    pub message: String,
    pub severity: ValidationSeverity,
}

impl ValidationError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == ValidationSeverity::Error
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            ValidationSeverity::Error => "ERROR",
            ValidationSeverity::Warning => "WARN",
        };
        write!(f, "[{}] {}: {}", level, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

// ── Main validation entry point ─────────────────────────────────────────

/// Validate a [`GovernorConfig`] and return every error and warning found.
///
/// All diagnostics are collected in a single pass.
pub fn validate_config(config: &GovernorConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_batch(&config.batch, &mut errors);
    validate_budget(&config.budget, &mut errors);
    validate_gateway(&config.gateway, &mut errors);

    if !(config.pricing.price_per_tib_usd > 0.0) {
        errors.push(ValidationError::error(
            "pricing.price_per_tib_usd",
            format!(
                "unit price must be positive, got {}",
                config.pricing.price_per_tib_usd
            ),
        ));
    }

    if !(config.monitor.reference_bytes_per_slot_ms > 0.0) {
        errors.push(ValidationError::error(
            "monitor.reference_bytes_per_slot_ms",
            "reference throughput must be positive",
        ));
    }
    if !(0.0..=1.0).contains(&config.monitor.low_efficiency_score) {
        errors.push(ValidationError::warning(
            "monitor.low_efficiency_score",
            format!(
                "{} is outside 0..=1; the finding will never or always fire",
                config.monitor.low_efficiency_score
            ),
        ));
    }

    errors
}

/// Fold `validate_config` output into a single startup error if any
/// diagnostic is fatal.
pub fn ensure_valid(config: &GovernorConfig) -> Result<Vec<ValidationError>, GovernorError> {
    let diagnostics = validate_config(config);
    let fatal: Vec<String> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| format!("{}: {}", d.field, d.message))
        .collect();
    if fatal.is_empty() {
        Ok(diagnostics)
    } else {
        Err(GovernorError::InvalidConfiguration {
            reason: fatal.join("; "),
        })
    }
}

// ── Batch ───────────────────────────────────────────────────────────────

fn validate_batch(batch: &BatchConfig, errors: &mut Vec<ValidationError>) {
    if batch.max_size == 0 {
        errors.push(ValidationError::error(
            "batch.max_size",
            "batch size must be at least 1",
        ));
    }
    if batch.max_age_ms == 0 {
        errors.push(ValidationError::error(
            "batch.max_age_ms",
            "max age must be positive",
        ));
    }
}

// ── Budget ──────────────────────────────────────────────────────────────

fn validate_budget(budget: &BudgetConfig, errors: &mut Vec<ValidationError>) {
    if !(budget.period_budget_usd > 0.0) {
        errors.push(ValidationError::error(
            "budget.period_budget_usd",
            format!(
                "period budget must be positive, got {}",
                budget.period_budget_usd
            ),
        ));
    }

    let thresholds = [
        ("monitoring_utilization_pct", budget.monitoring_utilization_pct),
        ("warning_utilization_pct", budget.warning_utilization_pct),
        ("critical_utilization_pct", budget.critical_utilization_pct),
    ];
    for (name, pct) in thresholds {
        if !(0.0..=100.0).contains(&pct) {
            errors.push(ValidationError::error(
                format!("budget.{name}"),
                format!("{pct} is outside 0..=100"),
            ));
        }
    }
    for pair in thresholds.windows(2) {
        let (lower_name, lower) = pair[0];
        let (upper_name, upper) = pair[1];
        if lower > upper {
            errors.push(ValidationError::error(
                format!("budget.{upper_name}"),
                format!("must be >= {lower_name} ({upper} < {lower})"),
            ));
        }
    }

    let ceilings = [
        ("max_query_cost_usd", budget.max_query_cost_usd),
        ("warning_ceiling_usd", budget.warning_ceiling_usd),
        ("critical_ceiling_usd", budget.critical_ceiling_usd),
    ];
    for (name, usd) in ceilings {
        if !(usd >= 0.0) {
            errors.push(ValidationError::error(
                format!("budget.{name}"),
                format!("ceiling must be non-negative, got {usd}"),
            ));
        }
    }
    for pair in ceilings.windows(2) {
        let (higher_name, higher) = pair[0];
        let (lower_name, lower) = pair[1];
        if lower > higher {
            errors.push(ValidationError::error(
                format!("budget.{lower_name}"),
                format!("must not exceed {higher_name} ({lower} > {higher})"),
            ));
        }
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────

fn validate_gateway(gateway: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let timeouts = [
        ("call_timeout_ms", Some(gateway.call_timeout_ms)),
        ("write_timeout_ms", gateway.write_timeout_ms),
        ("dry_run_timeout_ms", gateway.dry_run_timeout_ms),
        ("execute_timeout_ms", gateway.execute_timeout_ms),
    ];
    for (name, value) in timeouts {
        if value == Some(0) {
            errors.push(ValidationError::error(
                format!("gateway.{name}"),
                "timeout must be positive",
            ));
        }
    }

    if gateway.write_retry_count > RETRY_COUNT_WARN_ABOVE {
        errors.push(ValidationError::warning(
            "gateway.write_retry_count",
            format!(
                "{} retries may hold a flush for a long time",
                gateway.write_retry_count
            ),
        ));
    }
    if gateway.write_retry_backoff_max_ms < gateway.write_retry_backoff_ms {
        errors.push(ValidationError::warning(
            "gateway.write_retry_backoff_max_ms",
            "cap is below the backoff step; every delay will equal the cap",
        ));
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
