use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, params};
use tracing::info;

use crate::config::FeatureConfig;
use crate::events::DATE_FMT;
use crate::features::{FeatureBuildReport, FeatureRow, Labels, SideFeatures};

fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create feature dir {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("open feature db {}", path.display()))?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        CREATE TABLE IF NOT EXISTS feature_rows (
            event_id TEXT PRIMARY KEY,
            event_date TEXT NOT NULL,
            season TEXT NULL,
            home_id TEXT NOT NULL,
            away_id TEXT NOT NULL,
            swapped INTEGER NOT NULL,
            home_avg_points_for REAL NOT NULL,
            home_avg_points_against REAL NOT NULL,
            home_win_rate REAL NOT NULL,
            home_rest_days REAL NOT NULL,
            away_avg_points_for REAL NOT NULL,
            away_avg_points_against REAL NOT NULL,
            away_win_rate REAL NOT NULL,
            away_rest_days REAL NOT NULL,
            label_home_win REAL NOT NULL,
            label_point_diff REAL NOT NULL,
            label_total_points REAL NOT NULL,
            home_odds REAL NULL,
            away_odds REAL NULL
        );
        CREATE INDEX IF NOT EXISTS idx_feature_rows_date ON feature_rows(event_date);

        CREATE TABLE IF NOT EXISTS feature_builds (
            build_id INTEGER PRIMARY KEY AUTOINCREMENT,
            built_at TEXT NOT NULL,
            window_size INTEGER NOT NULL,
            side_assignment TEXT NOT NULL,
            events INTEGER NOT NULL,
            row_count INTEGER NOT NULL,
            dropped_missing_history INTEGER NOT NULL,
            dropped_join_miss INTEGER NOT NULL
        );
        "#,
    )
    .context("init feature schema")?;
    Ok(conn)
}

/// Replaces the whole feature table in one transaction, so readers see either
/// the previous build or this one.
pub fn write_feature_rows(
    path: &Path,
    rows: &[FeatureRow],
    cfg: &FeatureConfig,
    report: &FeatureBuildReport,
) -> Result<()> {
    let mut conn = open_db(path)?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM feature_rows", [])?;
    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO feature_rows (
                event_id, event_date, season, home_id, away_id, swapped,
                home_avg_points_for, home_avg_points_against, home_win_rate, home_rest_days,
                away_avg_points_for, away_avg_points_against, away_win_rate, away_rest_days,
                label_home_win, label_point_diff, label_total_points, home_odds, away_odds
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
        )?;
        for row in rows {
            stmt.execute(params![
                row.event_id,
                row.event_date.format(DATE_FMT).to_string(),
                row.season,
                row.home_id,
                row.away_id,
                row.swapped as i64,
                row.home.avg_points_for,
                row.home.avg_points_against,
                row.home.win_rate,
                row.home.rest_days,
                row.away.avg_points_for,
                row.away.avg_points_against,
                row.away.win_rate,
                row.away.rest_days,
                row.labels.home_win,
                row.labels.point_diff,
                row.labels.total_points,
                row.home_odds,
                row.away_odds,
            ])
            .with_context(|| format!("insert feature row {}", row.event_id))?;
        }
    }
    let sides = serde_json::to_string(&cfg.side_assignment)?;
    tx.execute(
        "INSERT INTO feature_builds(built_at, window_size, side_assignment, events, row_count,
                                    dropped_missing_history, dropped_join_miss)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Utc::now().to_rfc3339(),
            cfg.window as i64,
            sides,
            report.events as i64,
            report.rows as i64,
            report.dropped_missing_history as i64,
            report.dropped_join_miss as i64
        ],
    )?;
    tx.commit()?;
    info!(path = %path.display(), rows = rows.len(), "wrote feature table");
    Ok(())
}

/// Feature rows in (event_date, event_id) order.
pub fn load_feature_rows(path: &Path) -> Result<Vec<FeatureRow>> {
    if !path.exists() {
        return Err(anyhow!(
            "feature db {} not found; run build_features first",
            path.display()
        ));
    }
    let conn = open_db(path)?;
    let mut stmt = conn.prepare(
        r#"
        SELECT
            event_id, event_date, season, home_id, away_id, swapped,
            home_avg_points_for, home_avg_points_against, home_win_rate, home_rest_days,
            away_avg_points_for, away_avg_points_against, away_win_rate, away_rest_days,
            label_home_win, label_point_diff, label_total_points, home_odds, away_odds
        FROM feature_rows
        ORDER BY event_date ASC, event_id ASC
        "#,
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, i64>(5)? != 0,
            SideFeatures {
                avg_points_for: row.get(6)?,
                avg_points_against: row.get(7)?,
                win_rate: row.get(8)?,
                rest_days: row.get(9)?,
            },
            SideFeatures {
                avg_points_for: row.get(10)?,
                avg_points_against: row.get(11)?,
                win_rate: row.get(12)?,
                rest_days: row.get(13)?,
            },
            Labels {
                home_win: row.get(14)?,
                point_diff: row.get(15)?,
                total_points: row.get(16)?,
            },
            row.get::<_, Option<f64>>(17)?,
            row.get::<_, Option<f64>>(18)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (event_id, date_raw, season, home_id, away_id, swapped, home, away, labels, home_odds, away_odds) =
            row?;
        let event_date = NaiveDate::parse_from_str(&date_raw, DATE_FMT)
            .with_context(|| format!("feature row {event_id} has bad date {date_raw:?}"))?;
        out.push(FeatureRow {
            event_id,
            event_date,
            season,
            home_id,
            away_id,
            swapped,
            home,
            away,
            labels,
            home_odds,
            away_odds,
        });
    }
    Ok(out)
}
