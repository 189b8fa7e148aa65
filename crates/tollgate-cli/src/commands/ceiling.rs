//! `tollgate ceiling` -- show the band and per-query ceiling for a spend.
//!
//! Uses the same step function as the live ledger, so the printed ceiling
//! is what a fresh period would enforce after spending `--spend` USD.
//!
//! # Example
//!
//! ```text
//! tollgate ceiling --spend 76
//! ```

use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};

use tollgate_core::ledger::{BudgetStatus, status_for, step_ceiling};
use tollgate_types::config::BudgetConfig;

/// Arguments for `tollgate ceiling`.
#[derive(Args)]
pub struct CeilingArgs {
    /// Period spend so far, in USD.
    #[arg(long)]
    pub spend: f64,

    /// Override the configured period budget, in USD.
    #[arg(long)]
    pub budget: Option<f64>,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,
}

/// What the ledger would report for a given spend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CeilingView {
    pub spend_usd: f64,
    pub budget_usd: f64,
    pub utilization: f64,
    pub status: BudgetStatus,
    pub ceiling_usd: f64,
}

/// Compute the band and ceiling for `spend_usd` under `config`.
pub fn ceiling_for(config: &BudgetConfig, spend_usd: f64) -> CeilingView {
    let utilization = if config.period_budget_usd > 0.0 {
        spend_usd.max(0.0) / config.period_budget_usd
    } else {
        1.0
    };
    CeilingView {
        spend_usd,
        budget_usd: config.period_budget_usd,
        utilization,
        status: status_for(config, utilization),
        ceiling_usd: step_ceiling(config, utilization),
    }
}

/// Run the ceiling command.
pub fn run(args: CeilingArgs) -> anyhow::Result<()> {
    if !args.spend.is_finite() {
        anyhow::bail!("--spend must be a finite number");
    }

    let mut config = super::load_config(args.config.as_deref())?.budget;
    if let Some(budget) = args.budget {
        config.period_budget_usd = budget;
    }

    let view = ceiling_for(&config, args.spend);
    println!("{}", render(&config, &view));
    Ok(())
}

fn render(config: &BudgetConfig, view: &CeilingView) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["BAND", "FROM", "CEILING", ""]);

    let bands = [
        (BudgetStatus::Normal, 0.0, config.max_query_cost_usd),
        (
            BudgetStatus::Monitoring,
            config.monitoring_utilization_pct,
            config.max_query_cost_usd,
        ),
        (
            BudgetStatus::Warning,
            config.warning_utilization_pct,
            config.warning_ceiling_usd,
        ),
        (
            BudgetStatus::Critical,
            config.critical_utilization_pct,
            config.critical_ceiling_usd,
        ),
    ];
    for (status, from_pct, ceiling) in bands {
        let marker = if status == view.status {
            format!(
                "<- ${:.2} of ${:.2} ({:.1}%)",
                view.spend_usd,
                view.budget_usd,
                view.utilization * 100.0
            )
        } else {
            String::new()
        };
        table.add_row([
            status.to_string(),
            format!("{from_pct:.0}%"),
            format!("${ceiling:.2}"),
            marker,
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_band_at_76_percent() {
        let view = ceiling_for(&BudgetConfig::default(), 76.0);
        assert_eq!(view.status, BudgetStatus::Warning);
        assert_eq!(view.ceiling_usd, 2.0);
        assert!((view.utilization - 0.76).abs() < 1e-9);
    }

    #[test]
    fn monitoring_band_keeps_max_ceiling() {
        let view = ceiling_for(&BudgetConfig::default(), 60.0);
        assert_eq!(view.status, BudgetStatus::Monitoring);
        assert_eq!(view.ceiling_usd, 10.0);
    }

    #[test]
    fn over_budget_is_critical() {
        let view = ceiling_for(&BudgetConfig::default(), 130.0);
        assert_eq!(view.status, BudgetStatus::Critical);
        assert_eq!(view.ceiling_usd, 0.5);
    }

    #[test]
    fn zero_budget_is_fully_utilized() {
        let config = BudgetConfig {
            period_budget_usd: 0.0,
            ..Default::default()
        };
        let view = ceiling_for(&config, 0.0);
        assert_eq!(view.status, BudgetStatus::Critical);
    }

    #[test]
    fn render_marks_current_band() {
        let config = BudgetConfig::default();
        let rendered = render(&config, &ceiling_for(&config, 76.0)).to_string();
        assert!(rendered.contains("warning"));
        assert!(rendered.contains("$76.00 of $100.00"));
    }
}
