//! `tollgate simulate` -- drive a synthetic workload through a governor.
//!
//! Admits `--records` ingest records (alternating posts and sentiment
//! results), then evaluates and executes `--queries` queries against an
//! in-memory warehouse. Query sizes cycle through half, one and two times
//! `--query-cost`, and every fifth query is served from cache. The
//! decisions are printed as a table followed by ledger, monitor and flush
//! totals.
//!
//! # Examples
//!
//! ```text
//! tollgate simulate
//! tollgate simulate --records 5000 --queries 50 --query-cost 2.5
//! tollgate simulate --prior-spend 80 --json
//! ```

use std::sync::Arc;

use chrono::Utc;
use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tollgate_core::Governor;
use tollgate_core::aggregator::FlushStats;
use tollgate_core::ledger::LedgerSnapshot;
use tollgate_core::memory::{MemoryWarehouse, QueryProfile};
use tollgate_core::monitor::MonitorSummary;
use tollgate_types::GovernorError;
use tollgate_types::job::{BYTES_PER_TIB, Query};
use tollgate_types::record::{AnalysisRecord, Engagement, PostRecord, Record, Sentiment};

/// Arguments for `tollgate simulate`.
#[derive(Args)]
pub struct SimulateArgs {
    /// Number of ingest records to admit.
    #[arg(long, default_value = "1000")]
    pub records: usize,

    /// Number of queries to evaluate.
    #[arg(long, default_value = "20")]
    pub queries: usize,

    /// Base estimated cost per query, in USD.
    #[arg(long, default_value = "0.75")]
    pub query_cost: f64,

    /// Base bytes scanned per query. Overrides `--query-cost`.
    #[arg(long)]
    pub query_bytes: Option<u64>,

    /// Spend already recorded this period before the workload starts, in USD.
    #[arg(long, default_value = "0")]
    pub prior_spend: f64,

    /// Print the full report as JSON instead of tables.
    #[arg(long)]
    pub json: bool,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Result of one simulated query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRow {
    pub query: String,
    pub outcome: &'static str,
    pub estimated_cost_usd: Option<f64>,
    pub ceiling_usd: Option<f64>,
    pub actual_cost_usd: Option<f64>,
    pub findings: Vec<String>,
    pub detail: Option<String>,
}

/// Everything `simulate` prints.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub queries: Vec<QueryRow>,
    pub ledger: LedgerSnapshot,
    pub monitor: MonitorSummary,
    pub flush: FlushStats,
}

/// Run the simulate command.
pub async fn run(args: SimulateArgs) -> anyhow::Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    let report = simulate(&args, config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", queries_table(&report.queries));
        println!("{}", summary_table(&report));
    }
    Ok(())
}

/// Execute the workload and collect the report.
pub async fn simulate(
    args: &SimulateArgs,
    config: tollgate_types::config::GovernorConfig,
) -> anyhow::Result<SimulationReport> {
    let price = config.pricing.price_per_tib_usd;
    let warehouse = Arc::new(MemoryWarehouse::new(price));
    let base_bytes = args
        .query_bytes
        .unwrap_or_else(|| (args.query_cost.max(0.0) / price * BYTES_PER_TIB).round() as u64);

    let queries: Vec<Query> = (0..args.queries)
        .map(|i| {
            let sql = format!("SELECT * FROM posts WHERE shard = {i}");
            let bytes = match i % 3 {
                0 => base_bytes / 2,
                1 => base_bytes,
                _ => base_bytes.saturating_mul(2),
            };
            let profile = QueryProfile::scanning(bytes);
            let profile = if i % 5 == 4 { profile.cached() } else { profile };
            warehouse.register_query(sql.clone(), profile);
            Query::new(sql).with_label(format!("q{i:03}"))
        })
        .collect();

    let (governor, service) = Governor::new(config, warehouse.clone())?;
    if args.prior_spend > 0.0 {
        governor.ledger().record_spend(args.prior_spend);
    }

    let cancel = CancellationToken::new();
    let flusher = tokio::spawn(service.run(cancel.clone()));

    info!(records = args.records, queries = args.queries, "starting simulation");

    for i in 0..args.records {
        governor.admit(synthetic_record(i))?;
    }

    let mut rows = Vec::with_capacity(queries.len());
    for query in &queries {
        rows.push(run_one(&governor, query).await);
    }

    cancel.cancel();
    let flush = flusher.await?;

    Ok(SimulationReport {
        queries: rows,
        ledger: governor.ledger().snapshot(),
        monitor: governor.monitor().summary(),
        flush,
    })
}

async fn run_one(governor: &Governor, query: &Query) -> QueryRow {
    let name = query.display_name();
    match governor.run_query(query).await {
        Ok(outcome) => QueryRow {
            query: name,
            outcome: "approved",
            estimated_cost_usd: outcome.decision.estimate.map(|e| e.estimated_cost_usd),
            ceiling_usd: Some(outcome.decision.ceiling_usd),
            actual_cost_usd: Some(outcome.report.actual_cost_usd),
            findings: outcome
                .report
                .findings
                .iter()
                .map(|f| f.kind.to_string())
                .collect(),
            detail: None,
        },
        Err(GovernorError::BudgetExhausted {
            estimate_usd,
            ceiling_usd,
        }) => QueryRow {
            query: name,
            outcome: "denied",
            estimated_cost_usd: Some(estimate_usd),
            ceiling_usd: Some(ceiling_usd),
            actual_cost_usd: None,
            findings: Vec::new(),
            detail: None,
        },
        Err(e) => QueryRow {
            query: name,
            outcome: "failed",
            estimated_cost_usd: None,
            ceiling_usd: None,
            actual_cost_usd: None,
            findings: Vec::new(),
            detail: Some(e.to_string()),
        },
    }
}

fn synthetic_record(i: usize) -> Record {
    let post_id = format!("sim-{:06}", i / 2);
    let now = Utc::now();
    if i % 2 == 0 {
        Record::post(
            format!("post:{post_id}"),
            PostRecord {
                post_id: post_id.clone(),
                platform: "simulated".into(),
                author_id: format!("author-{}", i % 17),
                content: format!("synthetic post {post_id}"),
                language: "en".into(),
                hashtags: Vec::new(),
                engagement: Engagement {
                    likes: (i % 50) as u64,
                    views: (i % 500) as u64,
                    ..Default::default()
                },
                created_at: now,
                ingested_at: now,
            },
        )
    } else {
        let score = ((i % 21) as f64 - 10.0) / 10.0;
        Record::analysis(
            format!("analysis:{post_id}"),
            AnalysisRecord {
                post_id,
                sentiment: Sentiment::from_score(score),
                sentiment_score: score,
                confidence: 0.8,
                model: "simulated".into(),
                analyzed_at: now,
            },
        )
    }
}

fn usd(value: Option<f64>) -> String {
    value.map(|v| format!("${v:.2}")).unwrap_or_else(|| "-".into())
}

fn queries_table(rows: &[QueryRow]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["QUERY", "OUTCOME", "ESTIMATE", "CEILING", "ACTUAL", "NOTES"]);
    for row in rows {
        let notes = match &row.detail {
            Some(detail) => detail.clone(),
            None => row.findings.join(", "),
        };
        table.add_row([
            row.query.clone(),
            row.outcome.to_string(),
            usd(row.estimated_cost_usd),
            usd(row.ceiling_usd),
            usd(row.actual_cost_usd),
            notes,
        ]);
    }
    table
}

fn summary_table(report: &SimulationReport) -> Table {
    let ledger = &report.ledger;
    let monitor = &report.monitor;
    let flush = &report.flush;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["METRIC", "VALUE"]);
    let rows = [
        ("period spend", format!("${:.2}", ledger.period_spend_usd)),
        ("remaining", format!("${:.2}", ledger.remaining_usd)),
        ("utilization", format!("{:.1}%", ledger.utilization * 100.0)),
        ("band", ledger.status.to_string()),
        ("ceiling", format!("${:.2}", ledger.current_ceiling_usd)),
        ("queries executed", monitor.queries.to_string()),
        (
            "cache hit rate",
            format!("{:.0}%", monitor.cache_hit_rate() * 100.0),
        ),
        ("mean efficiency", format!("{:.2}", monitor.mean_efficiency())),
        ("batches flushed", flush.batches.to_string()),
        ("records inserted", flush.inserted.to_string()),
        ("records failed", flush.failed_records.to_string()),
    ];
    for (metric, value) in rows {
        table.add_row([metric.to_string(), value]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_types::config::GovernorConfig;

    fn args(records: usize, queries: usize, query_cost: f64, prior_spend: f64) -> SimulateArgs {
        SimulateArgs {
            records,
            queries,
            query_cost,
            query_bytes: None,
            prior_spend,
            json: false,
            config: None,
        }
    }

    #[tokio::test]
    async fn all_records_flushed_on_shutdown() {
        let mut config = GovernorConfig::default();
        config.batch.max_size = 64;
        let report = simulate(&args(300, 0, 1.0, 0.0), config).await.unwrap();

        assert_eq!(report.flush.records, 300);
        assert_eq!(report.flush.inserted, 300);
        assert_eq!(report.flush.failed_records, 0);
        assert!(report.queries.is_empty());
    }

    #[tokio::test]
    async fn cheap_queries_are_approved_and_charged() {
        let report = simulate(&args(0, 6, 0.5, 0.0), GovernorConfig::default())
            .await
            .unwrap();

        assert!(report.queries.iter().all(|q| q.outcome == "approved"));
        assert_eq!(report.monitor.queries, 6);
        // Query 4 is cached and billed nothing.
        assert_eq!(report.queries[4].actual_cost_usd, Some(0.0));
        assert!(report.ledger.period_spend_usd > 0.0);
    }

    #[tokio::test]
    async fn warning_band_denies_expensive_queries() {
        let report = simulate(&args(0, 3, 2.5, 76.0), GovernorConfig::default())
            .await
            .unwrap();

        // $1.25 fits under the $2.00 warning ceiling; $2.50 and $5.00 do not.
        let outcomes: Vec<_> = report.queries.iter().map(|q| q.outcome).collect();
        assert_eq!(outcomes, ["approved", "denied", "denied"]);
        assert_eq!(report.queries[1].ceiling_usd, Some(2.0));
    }

    #[test]
    fn records_alternate_tables() {
        let post = synthetic_record(0);
        let analysis = synthetic_record(1);
        assert_ne!(post.table(), analysis.table());
        assert_ne!(post.key(), analysis.key());
    }

    #[test]
    fn usd_formatting() {
        assert_eq!(usd(Some(2.0)), "$2.00");
        assert_eq!(usd(None), "-");
    }
}
