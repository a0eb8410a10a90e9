use chrono::NaiveDate;

use sports_backtest::backtest::{Target, run_all_targets, run_backtest};
use sports_backtest::config::BacktestConfig;
use sports_backtest::estimators::LogisticRegression;
use sports_backtest::features::{FeatureRow, Labels, SideFeatures};
use sports_backtest::report::summarize;
use sports_backtest::splits::{PeriodKey, plan_splits};

fn side(strength: f64) -> SideFeatures {
    SideFeatures {
        avg_points_for: 100.0 + strength,
        avg_points_against: 100.0 - strength,
        win_rate: (0.5 + strength / 40.0).clamp(0.0, 1.0),
        rest_days: 2.0,
    }
}

/// A row whose home side is stronger on odd `i`; `home_wins` overrides the
/// outcome when set.
fn row(year: i32, i: usize, home_wins: Option<bool>) -> FeatureRow {
    let date = NaiveDate::from_ymd_opt(year, 1 + (i % 12) as u32, 1 + (i % 27) as u32).unwrap();
    let edge = if i % 2 == 1 { 6.0 } else { -6.0 } + (i % 5) as f64;
    let won = home_wins.unwrap_or(edge > 0.0);
    let diff = if won { 3.0 + (i % 3) as f64 } else { -2.0 - (i % 4) as f64 };
    FeatureRow {
        event_id: format!("{year}-{i:03}"),
        event_date: date,
        season: Some(year.to_string()),
        home_id: format!("H{}", i % 6),
        away_id: format!("A{}", i % 7),
        swapped: false,
        home: side(edge),
        away: side(-edge),
        labels: Labels {
            home_win: if won { 1.0 } else { 0.0 },
            point_diff: diff,
            total_points: 200.0 + diff,
        },
        home_odds: Some(1.9),
        away_odds: Some(2.1),
    }
}

fn seasons(years: &[i32], per_year: usize) -> Vec<FeatureRow> {
    let mut rows: Vec<FeatureRow> = years
        .iter()
        .flat_map(|&y| (0..per_year).map(move |i| row(y, i, None)))
        .collect();
    rows.sort_by(|a, b| a.event_date.cmp(&b.event_date).then_with(|| a.event_id.cmp(&b.event_id)));
    rows
}

fn cfg(min_train_size: usize) -> BacktestConfig {
    BacktestConfig {
        min_train_size,
        epochs: 200,
        ..BacktestConfig::default()
    }
}

#[test]
fn training_rows_always_precede_the_test_period() {
    let rows = seasons(&[2015, 2016, 2017, 2018], 30);
    let key = PeriodKey::CalendarYear;
    let plan = plan_splits(&rows, key, 20);

    assert_eq!(plan.skipped.len(), 1);
    assert_eq!(plan.skipped[0].period, 2015);
    assert_eq!(plan.skipped[0].prior_rows, 0);

    let tests: Vec<i32> = plan.splits.iter().map(|s| s.test_period).collect();
    assert_eq!(tests, vec![2016, 2017, 2018]);
    let trains: Vec<Vec<i32>> = plan.splits.iter().map(|s| s.train_periods.clone()).collect();
    assert_eq!(
        trains,
        vec![vec![2015], vec![2015, 2016], vec![2015, 2016, 2017]]
    );

    for split in &plan.splits {
        assert_eq!(split.train_rows.len(), 30 * split.train_periods.len());
        assert_eq!(split.test_rows.len(), 30);
        let first_test = split
            .test_rows
            .iter()
            .map(|&i| rows[i].event_date)
            .min()
            .unwrap();
        for &i in &split.train_rows {
            assert!(rows[i].event_date < first_test);
            assert!(key.period_of(rows[i].event_date) < split.test_period);
        }
        for &i in &split.test_rows {
            assert_eq!(key.period_of(rows[i].event_date), split.test_period);
        }
    }
}

#[test]
fn min_train_size_pushes_the_first_test_period_later() {
    let rows = seasons(&[2015, 2016, 2017, 2018], 30);
    let plan = plan_splits(&rows, PeriodKey::CalendarYear, 45);
    let tests: Vec<i32> = plan.splits.iter().map(|s| s.test_period).collect();
    assert_eq!(tests, vec![2017, 2018]);
    let skipped: Vec<i32> = plan.skipped.iter().map(|s| s.period).collect();
    assert_eq!(skipped, vec![2015, 2016]);
}

#[test]
fn single_class_training_marks_only_that_period_invalid() {
    let mut rows: Vec<FeatureRow> = (0..30).map(|i| row(2015, i, Some(true))).collect();
    for year in [2016, 2017, 2018] {
        rows.extend((0..30).map(|i| row(year, i, None)));
    }
    rows.sort_by(|a, b| a.event_date.cmp(&b.event_date).then_with(|| a.event_id.cmp(&b.event_id)));

    let config = cfg(20);
    let plan = plan_splits(&rows, PeriodKey::CalendarYear, config.min_train_size);
    let metrics = run_backtest(
        &rows,
        &plan,
        Target::HomeWin,
        &LogisticRegression::default(),
        &config,
    );
    assert_eq!(metrics.len(), 3);
    assert_eq!(metrics[0].period, 2016);
    assert!(!metrics[0].is_valid());
    assert!(metrics[0].invalid_reason().is_some());
    assert!(metrics[0].accuracy.is_none());
    assert!(metrics[1].is_valid() && metrics[2].is_valid());

    let report = summarize(&metrics, &plan.skipped);
    let summary = report.target(Target::HomeWin).unwrap();
    assert_eq!(summary.valid_periods, 2);
    assert_eq!(summary.invalid_periods, 1);
    assert_eq!(summary.skipped_periods, 1);

    let accuracy = summary.metric("accuracy").unwrap();
    assert_eq!(accuracy.periods, 2);
    let expected = (metrics[1].accuracy.unwrap() + metrics[2].accuracy.unwrap()) / 2.0;
    assert!((accuracy.mean - expected).abs() < 1e-12);

    assert_eq!(report.periods.len(), 3);
    assert_eq!(report.counts().invalid_splits, 1);
}

#[test]
fn every_target_scores_every_split() {
    let rows = seasons(&[2015, 2016, 2017], 40);
    let config = cfg(20);
    let plan = plan_splits(&rows, config.period_key, config.min_train_size);
    let metrics = run_all_targets(&rows, &plan, &config);
    assert_eq!(metrics.len(), 3 * plan.splits.len());
    assert!(metrics.iter().all(|m| m.is_valid()));

    let win: Vec<_> = metrics.iter().filter(|m| m.target == Target::HomeWin).collect();
    // Home edge decides every outcome, so the classifier should find it.
    assert!(win.iter().all(|m| m.accuracy.unwrap() > 0.8));
    assert!(win.iter().all(|m| m.bets == m.test_rows));

    let totals: Vec<_> = metrics.iter().filter(|m| m.target == Target::TotalPoints).collect();
    assert!(totals.iter().all(|m| m.bets == 0 && m.roi.is_none() && m.mae.is_some()));
}
