use std::path::Path;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use sports_backtest::backtest::{Target, run_all_targets};
use sports_backtest::collect::{CancelToken, collect_all};
use sports_backtest::config::{PipelineConfig, SourceKind, SourceSpec};
use sports_backtest::events::DateRange;
use sports_backtest::feature_store::{load_feature_rows, write_feature_rows};
use sports_backtest::features::build_features;
use sports_backtest::raw_store::RawEventStore;
use sports_backtest::report::{export_workbook, summarize, write_report_db};
use sports_backtest::splits::plan_splits;

const TEAMS: [&str; 6] = ["BOS", "NYR", "TOR", "MTL", "DET", "CHI"];

/// Writes one JSON file every third day with two games each. Team strength
/// follows its index, so home wins are learnable but not certain.
fn write_league(dir: &Path, start: NaiveDate, days: i64) -> usize {
    let mut rng = StdRng::seed_from_u64(7);
    let mut files = 0;
    for day in (0..days).step_by(3) {
        let date = start + Duration::days(day);
        let mut games = Vec::new();
        for g in 0..2 {
            let home = (day as usize / 3 + g * 3) % TEAMS.len();
            let away = (home + 1 + g) % TEAMS.len();
            let home_score = rng.gen_range(0..4) + (TEAMS.len() - home) as u32 / 2;
            let away_score = rng.gen_range(0..4) + (TEAMS.len() - away) as u32 / 2;
            games.push(json!({
                "event_id": format!("{date}-{g}"),
                "season": date.format("%Y").to_string(),
                "home_id": TEAMS[home],
                "away_id": TEAMS[away],
                "home_score": home_score,
                "away_score": away_score,
                "home_odds": 1.95,
                "away_odds": 1.95,
            }));
        }
        let body = json!({ "events": games });
        std::fs::write(dir.join(format!("{date}.json")), body.to_string()).unwrap();
        files += 1;
    }
    files
}

#[test]
fn local_league_runs_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let feed = tmp.path().join("feed");
    std::fs::create_dir_all(&feed).unwrap();
    let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
    let files = write_league(&feed, start, (end - start).num_days() + 1);

    let mut spec = SourceSpec::new("league", SourceKind::Local);
    spec.local_dir = Some(feed.clone());
    let mut cfg = PipelineConfig {
        data_dir: tmp.path().join("data"),
        sources: vec![spec],
        ..PipelineConfig::default()
    };
    cfg.collect.rate_limit_ms = 0;
    cfg.collect.backoff_base_ms = 0;
    cfg.collect.backoff_max_ms = 0;
    cfg.features.window = 3;
    cfg.backtest.min_train_size = 50;
    cfg.backtest.epochs = 150;
    cfg.validate().unwrap();

    let range = DateRange::new(start, end).unwrap();
    let reports = collect_all(&cfg, None, &range, None, &CancelToken::new()).unwrap();
    assert_eq!(reports.len(), 1);
    let first = &reports[0];
    assert_eq!(first.units_requested, range.date_units().len());
    assert_eq!(first.collected, first.units_requested);
    assert_eq!(first.events_written, files * 2);
    assert_eq!(first.skipped_transient + first.skipped_permanent, 0);

    // Nothing left to do on a second pass.
    let again = collect_all(&cfg, None, &range, None, &CancelToken::new()).unwrap();
    assert_eq!(again[0].units_pending, 0);
    assert_eq!(again[0].events_written, 0);

    let store = RawEventStore::open_existing(&cfg.raw_store_path("league"), "league").unwrap();
    let events = store.load_events().unwrap();
    assert_eq!(events.len(), files * 2);

    let build = build_features(&events, &cfg.features);
    assert_eq!(
        build.report.rows + build.report.dropped_missing_history + build.report.dropped_join_miss,
        events.len()
    );
    assert_eq!(build.report.dropped_join_miss, 0);
    let feature_path = cfg.feature_store_path("league");
    write_feature_rows(&feature_path, &build.rows, &cfg.features, &build.report).unwrap();
    let rows = load_feature_rows(&feature_path).unwrap();
    assert_eq!(rows, build.rows);

    let plan = plan_splits(&rows, cfg.backtest.period_key, cfg.backtest.min_train_size);
    let tests: Vec<i32> = plan.splits.iter().map(|s| s.test_period).collect();
    assert_eq!(tests, vec![2022, 2023]);

    let metrics = run_all_targets(&rows, &plan, &cfg.backtest);
    assert_eq!(metrics.len(), 3 * 2);
    let report = summarize(&metrics, &plan.skipped);
    for target in Target::ALL {
        let summary = report.target(target).unwrap();
        assert_eq!(summary.valid_periods + summary.invalid_periods, 2);
    }

    let db = cfg.backtest_db_path("league");
    write_report_db(&db, &report, cfg.backtest.period_key).unwrap();
    let conn = rusqlite::Connection::open(&db).unwrap();
    let stored: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT period) FROM period_metrics WHERE target = 'home_win'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(stored, 2);
    let skipped: i64 = conn
        .query_row("SELECT COUNT(*) FROM skipped_periods", [], |r| r.get(0))
        .unwrap();
    assert_eq!(skipped, 1);

    let workbook = cfg.backtest_workbook_path("league", Target::HomeWin);
    export_workbook(&workbook, &report, Target::HomeWin, cfg.backtest.period_key).unwrap();
    assert!(workbook.exists());
}
