use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use rust_xlsxwriter::{Workbook, Worksheet};
use tracing::info;

use crate::backtest::{PeriodMetric, Target};
use crate::splits::{PeriodKey, SkippedPeriod};

/// Counts every stage reports so no record disappears without a number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub collected: usize,
    /// Events already stored under the same id with the same content.
    pub duplicate_events: usize,
    /// Units refused because an event id named a different stored game.
    /// Also counted in `skipped_permanent`.
    pub conflicting_units: usize,
    pub skipped_transient: usize,
    pub skipped_permanent: usize,
    pub dropped_missing_history: usize,
    pub dropped_join_miss: usize,
    pub invalid_splits: usize,
}

impl RunCounts {
    pub fn merge(&mut self, other: &RunCounts) {
        self.collected += other.collected;
        self.duplicate_events += other.duplicate_events;
        self.conflicting_units += other.conflicting_units;
        self.skipped_transient += other.skipped_transient;
        self.skipped_permanent += other.skipped_permanent;
        self.dropped_missing_history += other.dropped_missing_history;
        self.dropped_join_miss += other.dropped_join_miss;
        self.invalid_splits += other.invalid_splits;
    }

    pub fn summary_line(&self) -> String {
        format!(
            "collected={} duplicate_events={} conflicting_units={} skipped_transient={} skipped_permanent={} dropped_missing_history={} dropped_join_miss={} invalid_splits={}",
            self.collected,
            self.duplicate_events,
            self.conflicting_units,
            self.skipped_transient,
            self.skipped_permanent,
            self.dropped_missing_history,
            self.dropped_join_miss,
            self.invalid_splits
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub metric: &'static str,
    pub mean: f64,
    pub median: f64,
    pub periods: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetSummary {
    pub target: Target,
    pub valid_periods: usize,
    pub invalid_periods: usize,
    pub skipped_periods: usize,
    pub metrics: Vec<MetricSummary>,
}

impl TargetSummary {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BacktestReport {
    pub targets: Vec<TargetSummary>,
    /// Every period record, invalid ones included.
    pub periods: Vec<PeriodMetric>,
    pub skipped: Vec<SkippedPeriod>,
}

impl BacktestReport {
    pub fn target(&self, target: Target) -> Option<&TargetSummary> {
        self.targets.iter().find(|t| t.target == target)
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            invalid_splits: self.periods.iter().filter(|p| !p.is_valid()).count(),
            ..RunCounts::default()
        }
    }
}

/// Mean and median of each metric over valid periods, per target. Invalid
/// periods are counted but contribute no values.
pub fn summarize(metrics: &[PeriodMetric], skipped: &[SkippedPeriod]) -> BacktestReport {
    let mut by_target: BTreeMap<Target, Vec<&PeriodMetric>> = BTreeMap::new();
    for m in metrics {
        by_target.entry(m.target).or_default().push(m);
    }

    let mut targets = Vec::with_capacity(by_target.len());
    for (target, periods) in by_target {
        let mut values: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();
        let mut order: Vec<&'static str> = Vec::new();
        let mut valid = 0usize;
        let mut invalid = 0usize;
        for p in periods {
            if !p.is_valid() {
                invalid += 1;
                continue;
            }
            valid += 1;
            for (name, value) in p.metric_values() {
                if !values.contains_key(name) {
                    order.push(name);
                }
                values.entry(name).or_default().push(value);
            }
        }
        let metrics = order
            .into_iter()
            .filter_map(|name| {
                let vals = values.get(name)?;
                Some(MetricSummary {
                    metric: name,
                    mean: crate::metrics::mean(vals)?,
                    median: crate::metrics::median(vals)?,
                    periods: vals.len(),
                })
            })
            .collect();
        targets.push(TargetSummary {
            target,
            valid_periods: valid,
            invalid_periods: invalid,
            skipped_periods: skipped.len(),
            metrics,
        });
    }

    BacktestReport {
        targets,
        periods: metrics.to_vec(),
        skipped: skipped.to_vec(),
    }
}

fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("open backtest db {}", path.display()))?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS period_metrics (
            target TEXT NOT NULL,
            period INTEGER NOT NULL,
            period_label TEXT NOT NULL,
            metric TEXT NOT NULL,
            value REAL NULL,
            valid INTEGER NOT NULL,
            invalid_reason TEXT NULL,
            train_rows INTEGER NOT NULL,
            test_rows INTEGER NOT NULL,
            written_at TEXT NOT NULL,
            PRIMARY KEY (target, period, metric)
        );

        CREATE TABLE IF NOT EXISTS metric_summary (
            target TEXT NOT NULL,
            metric TEXT NOT NULL,
            mean REAL NOT NULL,
            median REAL NOT NULL,
            periods INTEGER NOT NULL,
            valid_periods INTEGER NOT NULL,
            invalid_periods INTEGER NOT NULL,
            skipped_periods INTEGER NOT NULL,
            written_at TEXT NOT NULL,
            PRIMARY KEY (target, metric)
        );

        CREATE TABLE IF NOT EXISTS skipped_periods (
            period INTEGER PRIMARY KEY,
            period_label TEXT NOT NULL,
            prior_rows INTEGER NOT NULL,
            period_rows INTEGER NOT NULL
        );
        "#,
    )
    .context("init backtest schema")?;
    Ok(conn)
}

/// Replaces the stored results of every target in `report` in one
/// transaction. Invalid periods keep a row with a NULL value.
pub fn write_report_db(path: &Path, report: &BacktestReport, key: PeriodKey) -> Result<()> {
    let mut conn = open_db(path)?;
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    for summary in &report.targets {
        tx.execute(
            "DELETE FROM period_metrics WHERE target = ?1",
            params![summary.target.as_str()],
        )?;
        tx.execute(
            "DELETE FROM metric_summary WHERE target = ?1",
            params![summary.target.as_str()],
        )?;
        for m in &summary.metrics {
            tx.execute(
                "INSERT INTO metric_summary(target, metric, mean, median, periods, valid_periods,
                                            invalid_periods, skipped_periods, written_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    summary.target.as_str(),
                    m.metric,
                    m.mean,
                    m.median,
                    m.periods as i64,
                    summary.valid_periods as i64,
                    summary.invalid_periods as i64,
                    summary.skipped_periods as i64,
                    now
                ],
            )?;
        }
    }

    for p in &report.periods {
        let mut rows: Vec<(&str, Option<f64>)> = p
            .metric_values()
            .into_iter()
            .map(|(name, value)| (name, Some(value)))
            .collect();
        if !p.is_valid() {
            rows.push(("invalid", None));
        }
        for (metric, value) in rows {
            tx.execute(
                "INSERT INTO period_metrics(target, period, period_label, metric, value, valid,
                                            invalid_reason, train_rows, test_rows, written_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    p.target.as_str(),
                    p.period,
                    p.period_label,
                    metric,
                    value,
                    p.is_valid() as i64,
                    p.invalid_reason(),
                    p.train_rows as i64,
                    p.test_rows as i64,
                    now
                ],
            )?;
        }
    }

    tx.execute("DELETE FROM skipped_periods", [])?;
    for s in &report.skipped {
        tx.execute(
            "INSERT INTO skipped_periods(period, period_label, prior_rows, period_rows)
             VALUES (?1, ?2, ?3, ?4)",
            params![s.period, key.label(s.period), s.prior_rows as i64, s.period_rows as i64],
        )?;
    }
    tx.commit()?;
    info!(path = %path.display(), periods = report.periods.len(), "wrote backtest report");
    Ok(())
}

/// One workbook per target: per-period table, summary and skipped periods.
pub fn export_workbook(path: &Path, report: &BacktestReport, target: Target, key: PeriodKey) -> Result<()> {
    let mut period_rows = vec![vec![
        "period".to_string(),
        "train_rows".to_string(),
        "test_rows".to_string(),
        "valid".to_string(),
        "invalid_reason".to_string(),
        "accuracy".to_string(),
        "log_loss".to_string(),
        "brier".to_string(),
        "mae".to_string(),
        "rmse".to_string(),
        "bets".to_string(),
        "profit".to_string(),
        "roi".to_string(),
    ]];
    for p in report.periods.iter().filter(|p| p.target == target) {
        period_rows.push(vec![
            p.period_label.clone(),
            p.train_rows.to_string(),
            p.test_rows.to_string(),
            p.is_valid().to_string(),
            p.invalid_reason().unwrap_or_default().to_string(),
            fmt_opt(p.accuracy),
            fmt_opt(p.log_loss),
            fmt_opt(p.brier),
            fmt_opt(p.mae),
            fmt_opt(p.rmse),
            p.bets.to_string(),
            format!("{:.4}", p.profit),
            fmt_opt(p.roi),
        ]);
    }

    let mut summary_rows = vec![vec![
        "metric".to_string(),
        "mean".to_string(),
        "median".to_string(),
        "periods".to_string(),
    ]];
    if let Some(summary) = report.target(target) {
        for m in &summary.metrics {
            summary_rows.push(vec![
                m.metric.to_string(),
                format!("{:.6}", m.mean),
                format!("{:.6}", m.median),
                m.periods.to_string(),
            ]);
        }
        summary_rows.push(vec!["valid_periods".to_string(), summary.valid_periods.to_string()]);
        summary_rows.push(vec!["invalid_periods".to_string(), summary.invalid_periods.to_string()]);
        summary_rows.push(vec!["skipped_periods".to_string(), summary.skipped_periods.to_string()]);
    }

    let mut skipped_rows = vec![vec![
        "period".to_string(),
        "prior_rows".to_string(),
        "period_rows".to_string(),
    ]];
    for s in &report.skipped {
        skipped_rows.push(vec![
            key.label(s.period),
            s.prior_rows.to_string(),
            s.period_rows.to_string(),
        ]);
    }

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Periods")?;
        write_rows(sheet, &period_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Summary")?;
        write_rows(sheet, &summary_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Skipped")?;
        write_rows(sheet, &skipped_rows)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report dir {}", parent.display()))?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
