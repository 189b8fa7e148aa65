//! Configuration schema types.
//!
//! All structs support both `snake_case` and `camelCase` field names in
//! JSON via `#[serde(alias)]`. Unknown fields are silently ignored for
//! forward compatibility, and every field has a default so an empty
//! object (`{}`) is a valid configuration.
//!
//! Semantic validation (positive budget, ordered thresholds, ...) lives in
//! `tollgate_core::validation`; serde only guarantees structure here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::cost_for_bytes;

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for a governor instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GovernorConfig {
    /// Batch aggregator settings.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Budget ledger and ceiling policy.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Warehouse gateway timeouts and write retries.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Unit pricing used to turn bytes into dollars.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Performance monitor alert thresholds.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

// ── Batch ────────────────────────────────────────────────────────────────

/// Batch aggregator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum records per batch. Reaching it triggers a flush.
    #[serde(default = "default_batch_max_size", alias = "maxSize")]
    pub max_size: usize,

    /// Maximum age of a batch, measured from its first record, in ms.
    #[serde(default = "default_batch_max_age_ms", alias = "maxAgeMs")]
    pub max_age_ms: u64,
}

fn default_batch_max_size() -> usize {
    500
}
fn default_batch_max_age_ms() -> u64 {
    5_000
}

impl BatchConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_age_ms: default_batch_max_age_ms(),
        }
    }
}

// ── Budget ───────────────────────────────────────────────────────────────

/// Recurring budget window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    /// Resets at 00:00 UTC.
    Daily,
    /// Resets on the first day of each UTC month.
    #[default]
    Monthly,
}

/// Budget ledger settings and the ceiling step policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total spend allowed per period, in USD.
    #[serde(default = "default_period_budget_usd", alias = "periodBudgetUsd")]
    pub period_budget_usd: f64,

    #[serde(default)]
    pub period: BudgetPeriod,

    /// Per-query ceiling while utilization is below the warning threshold.
    #[serde(default = "default_max_query_cost_usd", alias = "maxQueryCostUsd")]
    pub max_query_cost_usd: f64,

    /// Utilization (0-100) at which the monitoring band starts.
    /// Informational only; the ceiling does not change.
    #[serde(
        default = "default_monitoring_utilization_pct",
        alias = "monitoringUtilizationPct"
    )]
    pub monitoring_utilization_pct: f64,

    /// Utilization (0-100) at which the warning ceiling applies.
    #[serde(
        default = "default_warning_utilization_pct",
        alias = "warningUtilizationPct"
    )]
    pub warning_utilization_pct: f64,

    /// Utilization (0-100) at which the critical ceiling applies.
    #[serde(
        default = "default_critical_utilization_pct",
        alias = "criticalUtilizationPct"
    )]
    pub critical_utilization_pct: f64,

    /// Per-query ceiling in the warning band, in USD.
    #[serde(default = "default_warning_ceiling_usd", alias = "warningCeilingUsd")]
    pub warning_ceiling_usd: f64,

    /// Per-query ceiling in the critical band, in USD.
    #[serde(default = "default_critical_ceiling_usd", alias = "criticalCeilingUsd")]
    pub critical_ceiling_usd: f64,
}

fn default_period_budget_usd() -> f64 {
    100.0
}
fn default_max_query_cost_usd() -> f64 {
    10.0
}
fn default_monitoring_utilization_pct() -> f64 {
    50.0
}
fn default_warning_utilization_pct() -> f64 {
    75.0
}
fn default_critical_utilization_pct() -> f64 {
    90.0
}
fn default_warning_ceiling_usd() -> f64 {
    2.0
}
fn default_critical_ceiling_usd() -> f64 {
    0.5
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            period_budget_usd: default_period_budget_usd(),
            period: BudgetPeriod::default(),
            max_query_cost_usd: default_max_query_cost_usd(),
            monitoring_utilization_pct: default_monitoring_utilization_pct(),
            warning_utilization_pct: default_warning_utilization_pct(),
            critical_utilization_pct: default_critical_utilization_pct(),
            warning_ceiling_usd: default_warning_ceiling_usd(),
            critical_ceiling_usd: default_critical_ceiling_usd(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

/// Warehouse gateway call settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Default timeout for every gateway call, in ms.
    #[serde(default = "default_call_timeout_ms", alias = "callTimeoutMs")]
    pub call_timeout_ms: u64,

    /// Override for `bulk_write` calls.
    #[serde(default, alias = "writeTimeoutMs")]
    pub write_timeout_ms: Option<u64>,

    /// Override for `dry_run` calls.
    #[serde(default, alias = "dryRunTimeoutMs")]
    pub dry_run_timeout_ms: Option<u64>,

    /// Override for `execute` calls.
    #[serde(default, alias = "executeTimeoutMs")]
    pub execute_timeout_ms: Option<u64>,

    /// Additional attempts after a transport-level write failure.
    #[serde(default = "default_write_retry_count", alias = "writeRetryCount")]
    pub write_retry_count: u32,

    /// Linear backoff step between write attempts, in ms.
    #[serde(default = "default_write_retry_backoff_ms", alias = "writeRetryBackoffMs")]
    pub write_retry_backoff_ms: u64,

    /// Upper bound for a single backoff delay, in ms.
    #[serde(
        default = "default_write_retry_backoff_max_ms",
        alias = "writeRetryBackoffMaxMs"
    )]
    pub write_retry_backoff_max_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_write_retry_count() -> u32 {
    3
}
fn default_write_retry_backoff_ms() -> u64 {
    200
}
fn default_write_retry_backoff_max_ms() -> u64 {
    2_000
}

impl GatewayConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.unwrap_or(self.call_timeout_ms))
    }

    pub fn dry_run_timeout(&self) -> Duration {
        Duration::from_millis(self.dry_run_timeout_ms.unwrap_or(self.call_timeout_ms))
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms.unwrap_or(self.call_timeout_ms))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            write_timeout_ms: None,
            dry_run_timeout_ms: None,
            execute_timeout_ms: None,
            write_retry_count: default_write_retry_count(),
            write_retry_backoff_ms: default_write_retry_backoff_ms(),
            write_retry_backoff_max_ms: default_write_retry_backoff_max_ms(),
        }
    }
}

// ── Pricing ──────────────────────────────────────────────────────────────

/// On-demand unit pricing.
///
/// Configurable per deployment because regional and negotiated prices
/// differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// USD per TiB scanned/billed.
    #[serde(default = "default_price_per_tib_usd", alias = "pricePerTibUsd")]
    pub price_per_tib_usd: f64,
}

fn default_price_per_tib_usd() -> f64 {
    6.25
}

impl PricingConfig {
    /// Cost in USD for `bytes` at the configured price.
    pub fn cost_for_bytes(&self, bytes: u64) -> f64 {
        cost_for_bytes(bytes, self.price_per_tib_usd)
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            price_per_tib_usd: default_price_per_tib_usd(),
        }
    }
}

// ── Monitor ──────────────────────────────────────────────────────────────

/// Performance monitor alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Actual per-query cost above which a `high_cost` finding is raised.
    #[serde(default = "default_cost_alert_usd", alias = "costAlertUsd")]
    pub cost_alert_usd: f64,

    /// Wall-clock duration above which a `slow_query` finding is raised, in ms.
    #[serde(default = "default_duration_alert_ms", alias = "durationAlertMs")]
    pub duration_alert_ms: u64,

    /// Bytes processed above which a `large_scan` finding is raised.
    #[serde(default = "default_bytes_alert", alias = "bytesAlert")]
    pub bytes_alert: u64,

    /// Throughput (bytes per slot-ms) that maps to an efficiency score of 1.0.
    #[serde(
        default = "default_reference_bytes_per_slot_ms",
        alias = "referenceBytesPerSlotMs"
    )]
    pub reference_bytes_per_slot_ms: f64,

    /// Score below which a `low_efficiency` finding is raised.
    #[serde(default = "default_low_efficiency_score", alias = "lowEfficiencyScore")]
    pub low_efficiency_score: f64,
}

fn default_cost_alert_usd() -> f64 {
    1.0
}
fn default_duration_alert_ms() -> u64 {
    30_000
}
fn default_bytes_alert() -> u64 {
    100 * 1024 * 1024 * 1024
}
fn default_reference_bytes_per_slot_ms() -> f64 {
    1024.0 * 1024.0
}
fn default_low_efficiency_score() -> f64 {
    0.1
}

impl MonitorConfig {
    pub fn duration_alert(&self) -> Duration {
        Duration::from_millis(self.duration_alert_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cost_alert_usd: default_cost_alert_usd(),
            duration_alert_ms: default_duration_alert_ms(),
            bytes_alert: default_bytes_alert(),
            reference_bytes_per_slot_ms: default_reference_bytes_per_slot_ms(),
            low_efficiency_score: default_low_efficiency_score(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg: GovernorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.batch.max_size, 500);
        assert_eq!(cfg.batch.max_age(), Duration::from_secs(5));
        assert_eq!(cfg.budget.period, BudgetPeriod::Monthly);
        assert!((cfg.budget.period_budget_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(cfg.gateway.write_retry_count, 3);
        assert!((cfg.pricing.price_per_tib_usd - 6.25).abs() < f64::EPSILON);
    }

    #[test]
    fn camel_case_aliases_accepted() {
        let json = r#"{
            "batch": { "maxSize": 100, "maxAgeMs": 250 },
            "budget": {
                "periodBudgetUsd": 40.0,
                "period": "daily",
                "warningCeilingUsd": 1.5,
                "criticalUtilizationPct": 95
            },
            "gateway": { "callTimeoutMs": 1000, "dryRunTimeoutMs": 50, "writeRetryCount": 1 },
            "pricing": { "pricePerTibUsd": 5.0 }
        }"#;
        let cfg: GovernorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.batch.max_size, 100);
        assert_eq!(cfg.batch.max_age_ms, 250);
        assert_eq!(cfg.budget.period, BudgetPeriod::Daily);
        assert!((cfg.budget.period_budget_usd - 40.0).abs() < f64::EPSILON);
        assert!((cfg.budget.warning_ceiling_usd - 1.5).abs() < f64::EPSILON);
        assert!((cfg.budget.critical_utilization_pct - 95.0).abs() < f64::EPSILON);
        assert_eq!(cfg.gateway.write_retry_count, 1);
        assert!((cfg.pricing.price_per_tib_usd - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn per_call_timeouts_fall_back_to_default() {
        let cfg = GatewayConfig {
            call_timeout_ms: 1_000,
            dry_run_timeout_ms: Some(50),
            ..Default::default()
        };
        assert_eq!(cfg.dry_run_timeout(), Duration::from_millis(50));
        assert_eq!(cfg.write_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.execute_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn unknown_fields_ignored() {
        let json = r#"{ "batch": { "maxSize": 7, "futureKnob": true }, "dashboards": [] }"#;
        let cfg: GovernorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.batch.max_size, 7);
    }

    #[test]
    fn pricing_cost_for_bytes() {
        let pricing = PricingConfig::default();
        let half_tib = 1u64 << 39;
        assert!((pricing.cost_for_bytes(half_tib) - 3.125).abs() < 1e-9);
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = GovernorConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: GovernorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.batch.max_size, cfg.batch.max_size);
        assert_eq!(restored.monitor.bytes_alert, cfg.monitor.bytes_alert);
    }
}
