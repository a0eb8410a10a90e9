use anyhow::{Context, Result, anyhow};

use sports_backtest::args::Args;
use sports_backtest::backtest::{Target, run_all_targets};
use sports_backtest::config::PipelineConfig;
use sports_backtest::feature_store::load_feature_rows;
use sports_backtest::logging;
use sports_backtest::report::{export_workbook, summarize, write_report_db};
use sports_backtest::splits::{PeriodKey, plan_splits};

fn main() -> Result<()> {
    logging::init();
    let args = Args::from_env();

    let mut cfg = PipelineConfig::load(args.path("--config").as_deref())?;
    if let Some(dir) = args.path("--data-dir") {
        cfg.data_dir = dir;
    }
    if let Some(n) = args.parsed::<usize>("--min-train-size")? {
        cfg.backtest.min_train_size = n;
    }
    if let Some(month) = args.parsed::<u32>("--season-start-month")? {
        cfg.backtest.period_key = PeriodKey::SeasonStartMonth(month);
    }
    if let Some(raw) = args.list("--targets") {
        cfg.backtest.targets = raw
            .iter()
            .map(|t| t.parse::<Target>().map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;
    }
    cfg.validate()?;

    let names = args
        .list("--sources")
        .unwrap_or_else(|| cfg.sources.iter().map(|s| s.name.clone()).collect());

    for name in names {
        let rows = load_feature_rows(&cfg.feature_store_path(&name))
            .with_context(|| format!("load features for {name}"))?;
        let plan = plan_splits(&rows, cfg.backtest.period_key, cfg.backtest.min_train_size);
        let metrics = run_all_targets(&rows, &plan, &cfg.backtest);
        let report = summarize(&metrics, &plan.skipped);

        let db = cfg.backtest_db_path(&name);
        write_report_db(&db, &report, cfg.backtest.period_key)?;
        for target in &cfg.backtest.targets {
            export_workbook(
                &cfg.backtest_workbook_path(&name, *target),
                &report,
                *target,
                cfg.backtest.period_key,
            )?;
        }

        println!("Backtest complete: {name}");
        println!("Rows: {} splits: {} skipped periods: {}", rows.len(), plan.splits.len(), plan.skipped.len());
        for summary in &report.targets {
            println!(
                "{}: valid={} invalid={} skipped={}",
                summary.target, summary.valid_periods, summary.invalid_periods, summary.skipped_periods
            );
            for m in &summary.metrics {
                println!("  {:<10} mean={:.4} median={:.4} periods={}", m.metric, m.mean, m.median, m.periods);
            }
        }
        for p in report.periods.iter().filter(|p| !p.is_valid()) {
            println!(
                "  invalid {} {}: {}",
                p.target,
                p.period_label,
                p.invalid_reason().unwrap_or("unknown")
            );
        }
        println!("Totals: {}", report.counts().summary_line());
        println!("DB: {}", db.display());
    }
    Ok(())
}
