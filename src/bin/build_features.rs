use anyhow::{Context, Result};

use sports_backtest::args::Args;
use sports_backtest::config::PipelineConfig;
use sports_backtest::feature_store::write_feature_rows;
use sports_backtest::features::{SideAssignment, build_features};
use sports_backtest::logging;
use sports_backtest::raw_store::RawEventStore;
use sports_backtest::report::RunCounts;

fn main() -> Result<()> {
    logging::init();
    let args = Args::from_env();

    let mut cfg = PipelineConfig::load(args.path("--config").as_deref())?;
    if let Some(dir) = args.path("--data-dir") {
        cfg.data_dir = dir;
    }
    if let Some(window) = args.parsed::<usize>("--window")? {
        cfg.features.window = window;
    }
    if let Some(seed) = args.parsed::<u64>("--seed")? {
        cfg.features.side_assignment = SideAssignment::Seeded { seed };
    }
    cfg.validate()?;

    let names = args
        .list("--sources")
        .unwrap_or_else(|| cfg.sources.iter().map(|s| s.name.clone()).collect());

    println!("Feature build complete");
    println!("Window: {}", cfg.features.window);
    let mut totals = RunCounts::default();
    for name in names {
        let store = RawEventStore::open_existing(&cfg.raw_store_path(&name), &name)
            .with_context(|| format!("open raw store for {name}"))?;
        let events = store.load_events()?;
        let build = build_features(&events, &cfg.features);
        let out = cfg.feature_store_path(&name);
        write_feature_rows(&out, &build.rows, &cfg.features, &build.report)?;

        let r = build.report;
        totals.dropped_missing_history += r.dropped_missing_history;
        totals.dropped_join_miss += r.dropped_join_miss;
        println!(
            "{name}: events={} rows={} dropped_missing_history={} dropped_join_miss={}",
            r.events, r.rows, r.dropped_missing_history, r.dropped_join_miss
        );
        println!("  features: {}", out.display());
    }
    println!("Totals: {}", totals.summary_line());
    Ok(())
}
