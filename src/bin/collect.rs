//! Collects raw events for the configured sources over a date range.
//!
//! No signal handler is installed, so the library's cancel token stays unset
//! here. Stopping the process is still safe: each flush is one SQLite
//! transaction that writes a unit's events together with its checkpoint row,
//! so a killed run never leaves a partial unit behind. The next run resumes
//! after the last committed flush; units fetched but not yet flushed are
//! fetched again.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;

use sports_backtest::args::Args;
use sports_backtest::collect::{CancelToken, collect_all};
use sports_backtest::config::PipelineConfig;
use sports_backtest::events::DateRange;
use sports_backtest::logging;
use sports_backtest::report::RunCounts;

fn main() -> Result<()> {
    logging::init();
    let args = Args::from_env();

    let mut cfg = PipelineConfig::load(args.path("--config").as_deref())?;
    if let Some(dir) = args.path("--data-dir") {
        cfg.data_dir = dir;
    }
    if let Some(k) = args.parsed::<usize>("--flush-every")? {
        cfg.collect.flush_every = k;
    }
    if let Some(ms) = args.parsed::<u64>("--rate-limit-ms")? {
        cfg.collect.rate_limit_ms = ms;
    }
    cfg.validate()?;

    let start = args
        .date("--from")?
        .ok_or_else(|| anyhow!("--from YYYY-MM-DD is required"))?;
    let end = args
        .date("--to")?
        .unwrap_or_else(|| Utc::now().date_naive());
    let range = DateRange::new(start, end).map_err(|e| anyhow!(e))?;
    let only = args.list("--sources");
    let max_units = args.parsed::<usize>("--max-units")?;

    let cancel = CancelToken::new();
    let reports = collect_all(&cfg, only.as_deref(), &range, max_units, &cancel)
        .context("collection failed")?;

    println!("Collection complete");
    println!("Range: {} .. {}", range.start, range.end);
    let mut totals = RunCounts::default();
    for report in &reports {
        totals.merge(&report.counts());
        println!(
            "{}: requested={} already={} collected={} no_data={} events={} duplicate={} conflicting={} skipped_transient={} skipped_permanent={}{}",
            report.source,
            report.units_requested,
            report.units_already_collected,
            report.collected,
            report.no_data,
            report.events_written,
            report.events_duplicate,
            report.units_conflicting,
            report.skipped_transient,
            report.skipped_permanent,
            if report.stopped_early { " (stopped early)" } else { "" }
        );
        println!("  store: {}", report.store_path.display());
        if !report.errors.is_empty() {
            println!("  errors: {}", report.errors.len());
            for err in report.errors.iter().take(6) {
                println!("   - {err}");
            }
        }
    }
    println!("Totals: {}", totals.summary_line());
    Ok(())
}
