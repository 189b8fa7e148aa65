//! Period-to-date spend tracking and the per-query cost ceiling.
//!
//! The [`BudgetLedger`] is the single source of truth for how much of the
//! period budget has been spent and for the ceiling the admission
//! controller enforces. It is an explicitly owned value (the governor holds
//! it in an `Arc`), never a static.
//!
//! Thread safety: all public methods take `&self` and use interior
//! mutability via [`std::sync::RwLock`]. Reading the ceiling and recording
//! spend are each a single lock acquisition.
//!
//! # Ceiling policy
//!
//! The ceiling is a step function of utilization (`spend / budget`):
//! `max_query_cost_usd` below the warning threshold, `warning_ceiling_usd`
//! up to the critical threshold, `critical_ceiling_usd` above it. Each
//! recomputation takes the minimum of the previous ceiling and the step
//! value, so the ceiling never rises inside a period. Only [`rollover`]
//! restores it.
//!
//! [`rollover`]: BudgetLedger::rollover

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tollgate_types::config::{BudgetConfig, BudgetPeriod};

use crate::clock::Clock;

// ── BudgetStatus ────────────────────────────────────────────────────────

/// Utilization band of the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    /// Below the monitoring threshold.
    Normal,
    /// Between monitoring and warning. The ceiling is unchanged.
    Monitoring,
    /// Between warning and critical. The warning ceiling applies.
    Warning,
    /// At or above critical. The critical ceiling applies.
    Critical,
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Monitoring => "monitoring",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// Band for a utilization fraction (`0.76` = 76%).
pub fn status_for(config: &BudgetConfig, utilization: f64) -> BudgetStatus {
    let pct = utilization * 100.0;
    if pct >= config.critical_utilization_pct {
        BudgetStatus::Critical
    } else if pct >= config.warning_utilization_pct {
        BudgetStatus::Warning
    } else if pct >= config.monitoring_utilization_pct {
        BudgetStatus::Monitoring
    } else {
        BudgetStatus::Normal
    }
}

/// Step ceiling for a utilization fraction, ignoring history.
pub fn step_ceiling(config: &BudgetConfig, utilization: f64) -> f64 {
    match status_for(config, utilization) {
        BudgetStatus::Normal | BudgetStatus::Monitoring => config.max_query_cost_usd,
        BudgetStatus::Warning => config.warning_ceiling_usd,
        BudgetStatus::Critical => config.critical_ceiling_usd,
    }
}

// ── LedgerSnapshot ──────────────────────────────────────────────────────

/// Point-in-time view of the ledger, for display and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub period: BudgetPeriod,
    pub period_start: DateTime<Utc>,
    pub period_budget_usd: f64,
    pub period_spend_usd: f64,
    pub remaining_usd: f64,
    /// Spend as a fraction of the budget (may exceed 1.0).
    pub utilization: f64,
    pub current_ceiling_usd: f64,
    pub status: BudgetStatus,
}

// ── BudgetLedger ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct LedgerState {
    period_spend_usd: f64,
    period_start: DateTime<Utc>,
    current_ceiling_usd: f64,
    status: BudgetStatus,
}

/// Tracks period spend and derives the active per-query ceiling.
pub struct BudgetLedger {
    config: BudgetConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<LedgerState>,
}

impl BudgetLedger {
    /// Create a ledger at the start of a fresh period.
    pub fn new(config: BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        let state = LedgerState {
            period_spend_usd: 0.0,
            period_start: clock.now(),
            current_ceiling_usd: config.max_query_cost_usd,
            status: BudgetStatus::Normal,
        };
        Self {
            config,
            clock,
            state: RwLock::new(state),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// The maximum estimated cost a single query may have right now.
    pub fn current_ceiling(&self) -> f64 {
        self.state
            .read()
            .expect("budget ledger lock poisoned")
            .current_ceiling_usd
    }

    /// Add `amount_usd` to the period spend and recompute the ceiling.
    ///
    /// Negative and non-finite amounts are ignored. Returns the ceiling
    /// after the update.
    pub fn record_spend(&self, amount_usd: f64) -> f64 {
        if !amount_usd.is_finite() || amount_usd < 0.0 {
            warn!(amount_usd, "ignoring invalid spend amount");
            return self.current_ceiling();
        }

        let mut state = self.state.write().expect("budget ledger lock poisoned");
        state.period_spend_usd += amount_usd;

        let utilization = self.utilization_of(state.period_spend_usd);
        let step = step_ceiling(&self.config, utilization);
        let previous = state.current_ceiling_usd;
        state.current_ceiling_usd = previous.min(step);

        let status = status_for(&self.config, utilization);
        if status > state.status {
            log_band_crossing(status, utilization, state.current_ceiling_usd);
            state.status = status;
        }

        debug!(
            amount_usd,
            period_spend_usd = state.period_spend_usd,
            ceiling_usd = state.current_ceiling_usd,
            "recorded spend"
        );
        state.current_ceiling_usd
    }

    /// Start a new period: spend to zero, ceiling to its maximum.
    pub fn rollover(&self) {
        let mut state = self.state.write().expect("budget ledger lock poisoned");
        self.reset(&mut state, self.clock.now());
    }

    /// Roll over if the clock has crossed a period boundary since the
    /// current period started. Returns whether a rollover happened.
    pub fn roll_if_due(&self) -> bool {
        let now = self.clock.now();
        {
            let state = self.state.read().expect("budget ledger lock poisoned");
            if !self.boundary_crossed(now, state.period_start) {
                return false;
            }
        }

        let mut state = self.state.write().expect("budget ledger lock poisoned");
        // Another caller may have rolled between the two locks.
        if !self.boundary_crossed(now, state.period_start) {
            return false;
        }
        self.reset(&mut state, now);
        true
    }

    /// Spend as a fraction of the period budget.
    pub fn utilization(&self) -> f64 {
        let spend = self
            .state
            .read()
            .expect("budget ledger lock poisoned")
            .period_spend_usd;
        self.utilization_of(spend)
    }

    /// Budget left in the period, never negative.
    pub fn remaining_usd(&self) -> f64 {
        let spend = self
            .state
            .read()
            .expect("budget ledger lock poisoned")
            .period_spend_usd;
        (self.config.period_budget_usd - spend).max(0.0)
    }

    pub fn status(&self) -> BudgetStatus {
        status_for(&self.config, self.utilization())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self
            .state
            .read()
            .expect("budget ledger lock poisoned")
            .clone();
        let utilization = self.utilization_of(state.period_spend_usd);
        LedgerSnapshot {
            period: self.config.period,
            period_start: state.period_start,
            period_budget_usd: self.config.period_budget_usd,
            period_spend_usd: state.period_spend_usd,
            remaining_usd: (self.config.period_budget_usd - state.period_spend_usd).max(0.0),
            utilization,
            current_ceiling_usd: state.current_ceiling_usd,
            status: status_for(&self.config, utilization),
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn utilization_of(&self, spend: f64) -> f64 {
        if self.config.period_budget_usd > 0.0 {
            spend / self.config.period_budget_usd
        } else {
            // A zero budget is exhausted from the start.
            1.0
        }
    }

    fn reset(&self, state: &mut LedgerState, now: DateTime<Utc>) {
        info!(
            period = ?self.config.period,
            previous_spend_usd = state.period_spend_usd,
            "budget period rollover"
        );
        state.period_spend_usd = 0.0;
        state.period_start = now;
        state.current_ceiling_usd = self.config.max_query_cost_usd;
        state.status = BudgetStatus::Normal;
    }

    fn boundary_crossed(&self, now: DateTime<Utc>, period_start: DateTime<Utc>) -> bool {
        match self.config.period {
            BudgetPeriod::Daily => now.date_naive() > period_start.date_naive(),
            BudgetPeriod::Monthly => {
                (now.year(), now.month()) > (period_start.year(), period_start.month())
            }
        }
    }
}

fn log_band_crossing(status: BudgetStatus, utilization: f64, ceiling_usd: f64) {
    let utilization_pct = utilization * 100.0;
    match status {
        BudgetStatus::Normal => {}
        BudgetStatus::Monitoring => {
            info!(utilization_pct, ceiling_usd, "budget entered monitoring band");
        }
        BudgetStatus::Warning | BudgetStatus::Critical => {
            warn!(
                band = %status,
                utilization_pct,
                ceiling_usd,
                "budget entered restricted band"
            );
        }
    }
}

impl fmt::Debug for BudgetLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().map(|s| s.clone()).ok();
        f.debug_struct("BudgetLedger")
            .field("config", &self.config)
            .field("state", &state)
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn ledger() -> BudgetLedger {
        BudgetLedger::new(BudgetConfig::default(), Arc::new(SystemClock))
    }

    fn ledger_with_clock(config: BudgetConfig, start: &str) -> (BudgetLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(at(start)));
        (BudgetLedger::new(config, clock.clone()), clock)
    }

    // ── Step policy ─────────────────────────────────────────────────

    #[test]
    fn fresh_ledger_has_max_ceiling() {
        let l = ledger();
        assert_eq!(l.current_ceiling(), 10.0);
        assert_eq!(l.status(), BudgetStatus::Normal);
        assert_eq!(l.remaining_usd(), 100.0);
    }

    #[test]
    fn monitoring_band_keeps_max_ceiling() {
        let l = ledger();
        l.record_spend(60.0);
        assert_eq!(l.status(), BudgetStatus::Monitoring);
        assert_eq!(l.current_ceiling(), 10.0);
    }

    #[test]
    fn seventy_six_percent_gives_warning_ceiling() {
        let l = ledger();
        l.record_spend(76.0);
        assert_eq!(l.status(), BudgetStatus::Warning);
        assert_eq!(l.current_ceiling(), 2.0);
    }

    #[test]
    fn critical_band() {
        let l = ledger();
        assert_eq!(l.record_spend(95.0), 0.5);
        assert_eq!(l.status(), BudgetStatus::Critical);
        assert_eq!(l.remaining_usd(), 5.0);
    }

    #[test]
    fn overspend_clamps_remaining() {
        let l = ledger();
        l.record_spend(130.0);
        assert_eq!(l.remaining_usd(), 0.0);
        assert!(l.utilization() > 1.0);
        assert_eq!(l.current_ceiling(), 0.5);
    }

    #[test]
    fn ceiling_never_rises_with_spend() {
        let l = ledger();
        let mut previous = l.current_ceiling();
        for _ in 0..100 {
            let next = l.record_spend(1.3);
            assert!(next <= previous);
            previous = next;
        }
    }

    #[test]
    fn misordered_ceilings_cannot_raise_ceiling() {
        let cfg = BudgetConfig {
            warning_ceiling_usd: 50.0,
            ..Default::default()
        };
        let l = BudgetLedger::new(cfg, Arc::new(SystemClock));
        l.record_spend(80.0);
        assert_eq!(l.current_ceiling(), 10.0);
    }

    #[test]
    fn invalid_amounts_ignored() {
        let l = ledger();
        l.record_spend(-5.0);
        l.record_spend(f64::NAN);
        l.record_spend(f64::INFINITY);
        assert_eq!(l.snapshot().period_spend_usd, 0.0);
        assert_eq!(l.current_ceiling(), 10.0);
    }

    #[test]
    fn zero_budget_is_exhausted() {
        let cfg = BudgetConfig {
            period_budget_usd: 0.0,
            ..Default::default()
        };
        let l = BudgetLedger::new(cfg, Arc::new(SystemClock));
        assert_eq!(l.status(), BudgetStatus::Critical);
    }

    #[test]
    fn step_ceiling_boundaries() {
        let cfg = BudgetConfig::default();
        assert_eq!(step_ceiling(&cfg, 0.7499), 10.0);
        assert_eq!(step_ceiling(&cfg, 0.75), 2.0);
        assert_eq!(step_ceiling(&cfg, 0.8999), 2.0);
        assert_eq!(step_ceiling(&cfg, 0.90), 0.5);
    }

    // ── Rollover ────────────────────────────────────────────────────

    #[test]
    fn rollover_restores_ceiling() {
        let (l, clock) = ledger_with_clock(BudgetConfig::default(), "2025-03-10T08:00:00Z");
        l.record_spend(92.0);
        assert_eq!(l.current_ceiling(), 0.5);

        clock.advance(chrono::Duration::hours(1));
        l.rollover();
        let snap = l.snapshot();
        assert_eq!(snap.period_spend_usd, 0.0);
        assert_eq!(snap.current_ceiling_usd, 10.0);
        assert_eq!(snap.status, BudgetStatus::Normal);
        assert_eq!(snap.period_start, at("2025-03-10T09:00:00Z"));
    }

    #[test]
    fn monthly_roll_if_due() {
        let (l, clock) = ledger_with_clock(BudgetConfig::default(), "2025-03-30T23:00:00Z");
        l.record_spend(80.0);

        clock.set(at("2025-03-31T23:59:59Z"));
        assert!(!l.roll_if_due());
        assert_eq!(l.current_ceiling(), 2.0);

        clock.set(at("2025-04-01T00:00:01Z"));
        assert!(l.roll_if_due());
        assert_eq!(l.current_ceiling(), 10.0);
        // Exactly once per boundary.
        assert!(!l.roll_if_due());
    }

    #[test]
    fn monthly_boundary_across_year() {
        let (l, clock) = ledger_with_clock(BudgetConfig::default(), "2025-12-31T12:00:00Z");
        clock.set(at("2026-01-01T00:00:00Z"));
        assert!(l.roll_if_due());
    }

    #[test]
    fn daily_roll_if_due() {
        let cfg = BudgetConfig {
            period: BudgetPeriod::Daily,
            ..Default::default()
        };
        let (l, clock) = ledger_with_clock(cfg, "2025-06-15T10:00:00Z");
        l.record_spend(50.0);

        clock.set(at("2025-06-15T23:59:00Z"));
        assert!(!l.roll_if_due());

        clock.set(at("2025-06-16T00:00:00Z"));
        assert!(l.roll_if_due());
        assert_eq!(l.snapshot().period_spend_usd, 0.0);
    }

    #[test]
    fn clock_moving_backwards_does_not_roll() {
        let (l, clock) = ledger_with_clock(BudgetConfig::default(), "2025-05-01T00:00:00Z");
        clock.set(at("2025-04-20T00:00:00Z"));
        assert!(!l.roll_if_due());
    }

    // ── Concurrency ─────────────────────────────────────────────────

    #[test]
    fn concurrent_spend_is_not_lost() {
        let l = Arc::new(ledger());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = Arc::clone(&l);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        l.record_spend(0.1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = l.snapshot();
        assert!((snap.period_spend_usd - 80.0).abs() < 1e-6);
        assert_eq!(snap.current_ceiling_usd, 2.0);
    }

    #[test]
    fn snapshot_serializes() {
        let l = ledger();
        l.record_spend(12.5);
        let json = serde_json::to_value(l.snapshot()).unwrap();
        assert_eq!(json["period"], "monthly");
        assert_eq!(json["status"], "normal");
        assert_eq!(json["period_spend_usd"], 12.5);
    }

    #[test]
    fn debug_impl_does_not_panic() {
        let s = format!("{:?}", ledger());
        assert!(s.contains("BudgetLedger"));
    }
}
