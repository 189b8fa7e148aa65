//! Executed-query telemetry and spend recording.
//!
//! [`PerformanceMonitor::record`] is the only path by which spend reaches
//! the ledger: the actual cost is derived from billed bytes (not from the
//! dry-run estimate), so cache hits cost nothing and estimate drift does
//! not accumulate. Findings are pure output; the monitor never aborts or
//! retries anything.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info};

use tollgate_types::config::{MonitorConfig, PricingConfig};
use tollgate_types::job::{Finding, FindingKind, JobMetrics};

use crate::ledger::BudgetLedger;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Efficiency of a job on a 0..=1 scale.
///
/// Throughput (`bytes_processed / slot_millis`) relative to
/// `reference_bytes_per_slot_ms`, clamped. A job that used no slot time
/// scores 1.0 if it was a cache hit or scanned nothing, 0.0 otherwise.
pub fn efficiency_score(metrics: &JobMetrics, reference_bytes_per_slot_ms: f64) -> f64 {
    if metrics.slot_millis == 0 {
        return if metrics.cache_hit || metrics.bytes_processed == 0 {
            1.0
        } else {
            0.0
        };
    }
    if reference_bytes_per_slot_ms <= 0.0 {
        return 0.0;
    }
    let throughput = metrics.bytes_processed as f64 / metrics.slot_millis as f64;
    (throughput / reference_bytes_per_slot_ms).clamp(0.0, 1.0)
}

/// What the monitor derived from one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    pub job_id: String,
    pub efficiency_score: f64,
    pub actual_cost_usd: f64,
    pub findings: Vec<Finding>,
}

impl MonitorReport {
    pub fn has(&self, kind: FindingKind) -> bool {
        self.findings.iter().any(|f| f.kind == kind)
    }
}

/// Running totals across every recorded job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorSummary {
    pub queries: u64,
    pub cache_hits: u64,
    pub failed_queries: u64,
    pub total_bytes_processed: u64,
    pub total_bytes_billed: u64,
    pub total_slot_millis: u64,
    pub total_cost_usd: f64,
    /// Finding counts keyed by kind name.
    pub findings: BTreeMap<String, u64>,
    #[serde(skip)]
    efficiency_sum: f64,
}

impl MonitorSummary {
    pub fn cache_hit_rate(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.queries as f64
        }
    }

    pub fn mean_efficiency(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.efficiency_sum / self.queries as f64
        }
    }

    fn absorb(&mut self, metrics: &JobMetrics, report: &MonitorReport) {
        self.queries += 1;
        if metrics.cache_hit {
            self.cache_hits += 1;
        }
        if metrics.error.is_some() {
            self.failed_queries += 1;
        }
        self.total_bytes_processed = self
            .total_bytes_processed
            .saturating_add(metrics.bytes_processed);
        self.total_bytes_billed = self.total_bytes_billed.saturating_add(metrics.bytes_billed);
        self.total_slot_millis = self.total_slot_millis.saturating_add(metrics.slot_millis);
        self.total_cost_usd += report.actual_cost_usd;
        self.efficiency_sum += report.efficiency_score;
        for finding in &report.findings {
            *self.findings.entry(finding.kind.to_string()).or_default() += 1;
        }
    }
}

/// Consumes job metrics, scores them and records their actual cost.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    pricing: PricingConfig,
    ledger: Arc<BudgetLedger>,
    summary: Mutex<MonitorSummary>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig, pricing: PricingConfig, ledger: Arc<BudgetLedger>) -> Self {
        Self {
            config,
            pricing,
            ledger,
            summary: Mutex::new(MonitorSummary::default()),
        }
    }

    /// Score `metrics`, record its actual cost against the ledger and
    /// return the findings.
    pub fn record(&self, metrics: &JobMetrics) -> MonitorReport {
        let efficiency = efficiency_score(metrics, self.config.reference_bytes_per_slot_ms);
        let actual_cost_usd = self.pricing.cost_for_bytes(metrics.bytes_billed);
        let findings = self.findings(metrics, efficiency, actual_cost_usd);

        // Spend belongs to the period it lands in.
        self.ledger.roll_if_due();
        let ceiling_usd = self.ledger.record_spend(actual_cost_usd);

        let report = MonitorReport {
            job_id: metrics.job_id.clone(),
            efficiency_score: efficiency,
            actual_cost_usd,
            findings,
        };

        self.summary
            .lock()
            .expect("monitor summary lock poisoned")
            .absorb(metrics, &report);

        info!(
            job_id = %report.job_id,
            actual_cost_usd,
            efficiency,
            findings = report.findings.len(),
            ceiling_usd,
            "query recorded"
        );
        for finding in &report.findings {
            debug!(job_id = %report.job_id, kind = %finding.kind, "{}", finding.message);
        }
        report
    }

    pub fn summary(&self) -> MonitorSummary {
        self.summary
            .lock()
            .expect("monitor summary lock poisoned")
            .clone()
    }

    fn findings(&self, metrics: &JobMetrics, efficiency: f64, actual_cost_usd: f64) -> Vec<Finding> {
        let mut findings = Vec::new();
        let cfg = &self.config;

        if let Some(error) = &metrics.error {
            findings.push(Finding::new(
                FindingKind::QueryError,
                format!("query failed: {error}"),
            ));
        }
        if actual_cost_usd > cfg.cost_alert_usd {
            findings.push(Finding::new(
                FindingKind::HighCost,
                format!(
                    "actual cost ${actual_cost_usd:.2} exceeds alert threshold ${:.2}",
                    cfg.cost_alert_usd
                ),
            ));
        }
        let duration = metrics.duration();
        if duration > cfg.duration_alert() {
            findings.push(Finding::new(
                FindingKind::SlowQuery,
                format!(
                    "ran for {:.1}s, threshold {:.1}s",
                    duration.as_secs_f64(),
                    cfg.duration_alert().as_secs_f64()
                ),
            ));
        }
        if metrics.bytes_processed > cfg.bytes_alert {
            findings.push(Finding::new(
                FindingKind::LargeScan,
                format!(
                    "scanned {:.1} GiB, threshold {:.1} GiB",
                    metrics.bytes_processed as f64 / GIB,
                    cfg.bytes_alert as f64 / GIB
                ),
            ));
        }
        if !metrics.cache_hit {
            findings.push(Finding::new(
                FindingKind::CacheMiss,
                "result was not served from cache",
            ));
        }
        if efficiency < cfg.low_efficiency_score {
            findings.push(Finding::new(
                FindingKind::LowEfficiency,
                format!(
                    "efficiency score {efficiency:.2} below {:.2}",
                    cfg.low_efficiency_score
                ),
            ));
        }
        findings
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("config", &self.config)
            .field("pricing", &self.pricing)
            .finish()
    }
}
