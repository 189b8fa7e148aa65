//! Query-side types: analytical queries, dry-run cost estimates, executed
//! job telemetry and the findings derived from it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An outbound analytical query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// SQL text, passed through to the warehouse untouched.
    pub sql: String,

    /// Optional caller label used in logs and findings.
    #[serde(default)]
    pub label: Option<String>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label if present, otherwise the first 40 characters of the SQL.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.sql.chars().take(40).collect(),
        }
    }
}

/// Result of a dry run. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Bytes the query would scan.
    pub bytes_processed: u64,
    /// Estimated on-demand cost in USD.
    pub estimated_cost_usd: f64,
}

impl CostEstimate {
    /// Price `bytes_processed` at `price_per_tib_usd`.
    pub fn from_bytes(bytes_processed: u64, price_per_tib_usd: f64) -> Self {
        Self {
            bytes_processed,
            estimated_cost_usd: cost_for_bytes(bytes_processed, price_per_tib_usd),
        }
    }
}

/// Bytes in one tebibyte, the on-demand billing unit.
pub const BYTES_PER_TIB: f64 = 1_099_511_627_776.0;

/// On-demand cost in USD for scanning `bytes` at `price_per_tib_usd`.
pub fn cost_for_bytes(bytes: u64, price_per_tib_usd: f64) -> f64 {
    (bytes as f64 / BYTES_PER_TIB) * price_per_tib_usd
}

/// Telemetry for one executed query. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Warehouse job identifier.
    pub job_id: String,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    /// Slot time consumed, in milliseconds.
    pub slot_millis: u64,
    pub cache_hit: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Query-level error reported alongside the metrics, if any.
    #[serde(default)]
    pub error: Option<String>,
}

impl JobMetrics {
    /// Wall-clock duration. Zero if the timestamps are inverted.
    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

// ── Findings ────────────────────────────────────────────────────────────

/// Category of a performance finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Actual cost above the per-query alert threshold.
    HighCost,
    /// Wall-clock duration above the alert threshold.
    SlowQuery,
    /// Bytes processed above the alert threshold.
    LargeScan,
    /// Result was not served from cache.
    CacheMiss,
    /// Efficiency score below the configured floor.
    LowEfficiency,
    /// The warehouse reported a query-level error.
    QueryError,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FindingKind::HighCost => "high_cost",
            FindingKind::SlowQuery => "slow_query",
            FindingKind::LargeScan => "large_scan",
            FindingKind::CacheMiss => "cache_miss",
            FindingKind::LowEfficiency => "low_efficiency",
            FindingKind::QueryError => "query_error",
        };
        f.write_str(s)
    }
}

/// An actionable observation about an executed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub message: String,
}

impl Finding {
    pub fn new(kind: FindingKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_tib_costs_the_unit_price() {
        let est = CostEstimate::from_bytes(1 << 40, 6.25);
        assert!((est.estimated_cost_usd - 6.25).abs() < 1e-9);
    }

    #[test]
    fn zero_bytes_is_free() {
        assert_eq!(cost_for_bytes(0, 6.25), 0.0);
    }

    #[test]
    fn duration_from_timestamps() {
        let start = Utc::now();
        let metrics = JobMetrics {
            job_id: "job-1".into(),
            bytes_processed: 0,
            bytes_billed: 0,
            slot_millis: 0,
            cache_hit: true,
            started_at: start,
            ended_at: start + chrono::Duration::milliseconds(1500),
            error: None,
        };
        assert_eq!(metrics.duration(), Duration::from_millis(1500));
    }

    #[test]
    fn inverted_timestamps_give_zero_duration() {
        let start = Utc::now();
        let metrics = JobMetrics {
            job_id: "job-2".into(),
            bytes_processed: 0,
            bytes_billed: 0,
            slot_millis: 0,
            cache_hit: false,
            started_at: start,
            ended_at: start - chrono::Duration::seconds(1),
            error: None,
        };
        assert_eq!(metrics.duration(), Duration::ZERO);
    }

    #[test]
    fn query_display_name_prefers_label() {
        let q = Query::new("SELECT * FROM posts").with_label("daily-rollup");
        assert_eq!(q.display_name(), "daily-rollup");
        let q = Query::new("SELECT 1");
        assert_eq!(q.display_name(), "SELECT 1");
    }

    #[test]
    fn finding_kind_display() {
        assert_eq!(FindingKind::CacheMiss.to_string(), "cache_miss");
        assert_eq!(FindingKind::HighCost.to_string(), "high_cost");
    }
}
