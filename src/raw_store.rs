use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::events::{CollectionUnit, DATE_FMT, PeriodScore, RawEvent};

const RAW_EVENT_COLUMNS: &[&str] = &[
    "source",
    "event_id",
    "unit_key",
    "event_date",
    "season",
    "home_id",
    "away_id",
    "home_score",
    "away_score",
    "periods_json",
    "home_odds",
    "away_odds",
];

const UNIT_COLUMNS: &[&str] = &["source", "unit_key", "unit_date", "event_count", "flushed_at"];

/// Every event a source produced for one completed unit.
#[derive(Debug, Clone)]
pub struct UnitBatch {
    pub unit: CollectionUnit,
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub units_written: usize,
    pub units_already_present: usize,
    pub events_inserted: usize,
    /// Events already stored with the same content, e.g. one game seen from
    /// two entity units.
    pub events_duplicate: usize,
    /// Units refused because an event id clashes with a different game.
    pub conflicts: Vec<EventConflict>,
}

impl AppendSummary {
    pub fn absorb(&mut self, other: AppendSummary) {
        self.units_written += other.units_written;
        self.units_already_present += other.units_already_present;
        self.events_inserted += other.events_inserted;
        self.events_duplicate += other.events_duplicate;
        self.conflicts.extend(other.conflicts);
    }
}

/// An event id that already names a different game. The unit carrying it is
/// not written and stays pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConflict {
    pub unit_key: String,
    pub event_id: String,
    pub stored_unit_key: String,
}

impl fmt::Display for EventConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: event {} conflicts with a different game stored under {}",
            self.unit_key, self.event_id, self.stored_unit_key
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestRunRecord {
    pub units_requested: usize,
    pub units_collected: usize,
    pub skipped_transient: usize,
    pub skipped_permanent: usize,
    pub events_written: usize,
    pub errors: Vec<String>,
}

/// Append-only SQLite store of raw events for one source.
///
/// `collected_units` is written in the same transaction as the unit's events,
/// so a unit key is visible if and only if all of its events are.
pub struct RawEventStore {
    conn: Connection,
    path: PathBuf,
    source: String,
}

impl RawEventStore {
    pub fn open(path: &Path, source: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|e| classify(path, e))?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
            source: source.to_string(),
        };
        store.check_existing_tables()?;
        store.init_schema()?;
        store.validate()?;
        store.create_indexes()?;
        Ok(store)
    }

    /// Opens a store that must already exist; a missing file is an error rather
    /// than an empty dataset.
    pub fn open_existing(path: &Path, source: &str) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "raw event store missing"),
            });
        }
        Self::open(path, source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// A store that already holds events must also hold its checkpoint table.
    /// Recreating that table empty would re-collect every unit on top of rows
    /// that are already there.
    fn check_existing_tables(&self) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .map_err(|e| classify(&self.path, e))?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| classify(&self.path, e))?
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| classify(&self.path, e))?;
        if tables.contains("raw_events") && !tables.contains("collected_units") {
            return Err(StoreError::corrupt(
                &self.path,
                "raw_events present without collected_units",
            ));
        }
        Ok(())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = FULL;
                CREATE TABLE IF NOT EXISTS raw_events (
                    source TEXT NOT NULL,
                    event_id TEXT NOT NULL,
                    unit_key TEXT NOT NULL,
                    event_date TEXT NOT NULL,
                    season TEXT NULL,
                    home_id TEXT NOT NULL,
                    away_id TEXT NOT NULL,
                    home_score INTEGER NOT NULL,
                    away_score INTEGER NOT NULL,
                    periods_json TEXT NOT NULL,
                    home_odds REAL NULL,
                    away_odds REAL NULL,
                    inserted_at TEXT NOT NULL,
                    PRIMARY KEY (source, event_id)
                );

                CREATE TABLE IF NOT EXISTS collected_units (
                    source TEXT NOT NULL,
                    unit_key TEXT NOT NULL,
                    unit_date TEXT NOT NULL,
                    event_count INTEGER NOT NULL,
                    flushed_at TEXT NOT NULL,
                    PRIMARY KEY (source, unit_key)
                );

                CREATE TABLE IF NOT EXISTS ingest_runs (
                    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    source TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    finished_at TEXT NULL,
                    units_requested INTEGER NOT NULL,
                    units_collected INTEGER NOT NULL,
                    skipped_transient INTEGER NOT NULL,
                    skipped_permanent INTEGER NOT NULL,
                    events_written INTEGER NOT NULL,
                    errors_json TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| classify(&self.path, e))
    }

    fn create_indexes(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                r#"
                CREATE INDEX IF NOT EXISTS idx_raw_events_date ON raw_events(event_date);
                CREATE INDEX IF NOT EXISTS idx_raw_events_unit ON raw_events(unit_key);
                "#,
            )
            .map_err(|e| classify(&self.path, e))
    }

    fn validate(&self) -> Result<(), StoreError> {
        let status: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| classify(&self.path, e))?;
        if status != "ok" {
            return Err(StoreError::corrupt(&self.path, format!("quick_check: {status}")));
        }
        self.require_columns("raw_events", RAW_EVENT_COLUMNS)?;
        self.require_columns("collected_units", UNIT_COLUMNS)?;
        Ok(())
    }

    fn require_columns(&self, table: &str, required: &[&str]) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .map_err(|e| classify(&self.path, e))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| classify(&self.path, e))?
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| classify(&self.path, e))?;
        for col in required {
            if !names.contains(*col) {
                return Err(StoreError::corrupt(
                    &self.path,
                    format!("table {table} is missing column {col}"),
                ));
            }
        }
        Ok(())
    }

    /// Writes every batch in a single transaction. Units whose key is already
    /// present are skipped whole, so replaying a flush never duplicates rows.
    pub fn append_units(&mut self, batches: &[UnitBatch]) -> Result<AppendSummary, StoreError> {
        let path = self.path.clone();
        let source = self.source.clone();
        let now = Utc::now().to_rfc3339();
        let mut summary = AppendSummary::default();

        let tx = self.conn.transaction().map_err(|e| classify(&path, e))?;
        for batch in batches {
            let unit_key = batch.unit.key();
            let present = tx
                .query_row(
                    "SELECT 1 FROM collected_units WHERE source = ?1 AND unit_key = ?2",
                    params![source, unit_key],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|e| classify(&path, e))?
                .is_some();
            if present {
                summary.units_already_present += 1;
                continue;
            }
            if let Some(conflict) = find_conflict(&tx, &source, &unit_key, &batch.events)
                .map_err(|e| classify(&path, e))?
            {
                warn!(
                    store = %path.display(),
                    unit = %conflict.unit_key,
                    event = %conflict.event_id,
                    stored_unit = %conflict.stored_unit_key,
                    "event id reused for a different game, unit left pending"
                );
                summary.conflicts.push(conflict);
                continue;
            }

            let mut inserted = 0usize;
            for ev in &batch.events {
                let periods_json = serde_json::to_string(&ev.periods)
                    .map_err(|e| StoreError::corrupt(&path, format!("encode periods: {e}")))?;
                let changed = tx
                    .execute(
                        r#"
                        INSERT OR IGNORE INTO raw_events (
                            source, event_id, unit_key, event_date, season,
                            home_id, away_id, home_score, away_score,
                            periods_json, home_odds, away_odds, inserted_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                        "#,
                        params![
                            source,
                            ev.event_id,
                            unit_key,
                            ev.event_date.format(DATE_FMT).to_string(),
                            ev.season,
                            ev.home_id,
                            ev.away_id,
                            ev.home_score as i64,
                            ev.away_score as i64,
                            periods_json,
                            ev.home_odds,
                            ev.away_odds,
                            now,
                        ],
                    )
                    .map_err(|e| classify(&path, e))?;
                inserted += changed;
            }
            let duplicate = batch.events.len() - inserted;
            if duplicate > 0 {
                debug!(store = %path.display(), unit = %unit_key, duplicate, "events already stored");
            }
            summary.events_inserted += inserted;
            summary.events_duplicate += duplicate;

            tx.execute(
                "INSERT INTO collected_units (source, unit_key, unit_date, event_count, flushed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    source,
                    unit_key,
                    batch.unit.date().format(DATE_FMT).to_string(),
                    inserted as i64,
                    now
                ],
            )
            .map_err(|e| classify(&path, e))?;
            summary.units_written += 1;
        }
        tx.commit().map_err(|e| classify(&path, e))?;

        debug!(
            store = %path.display(),
            units = summary.units_written,
            events = summary.events_inserted,
            "flushed unit batch"
        );
        Ok(summary)
    }

    /// Distinct unit keys durably present, read from one consistent snapshot.
    ///
    /// Each unit's recorded event count is cross-checked against the rows that
    /// actually carry its key; a mismatch means the store was edited outside
    /// this writer and is reported as corruption.
    pub fn completed_unit_keys(&self) -> Result<BTreeSet<String>, StoreError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| classify(&self.path, e))?;
        let mut stmt = tx
            .prepare(
                r#"
                SELECT u.unit_key, u.event_count,
                       (SELECT COUNT(*) FROM raw_events r
                         WHERE r.source = u.source AND r.unit_key = u.unit_key)
                FROM collected_units u
                WHERE u.source = ?1
                ORDER BY u.unit_key ASC
                "#,
            )
            .map_err(|e| classify(&self.path, e))?;
        let rows = stmt
            .query_map(params![self.source], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(|e| classify(&self.path, e))?;

        let mut out = BTreeSet::new();
        for row in rows {
            let (key, recorded, actual) = row.map_err(|e| classify(&self.path, e))?;
            if CollectionUnit::parse_key(&key).is_none() {
                return Err(StoreError::corrupt(
                    &self.path,
                    format!("unparseable unit key {key:?}"),
                ));
            }
            if recorded != actual {
                return Err(StoreError::corrupt(
                    &self.path,
                    format!("unit {key} records {recorded} events but {actual} are stored"),
                ));
            }
            out.insert(key);
        }
        Ok(out)
    }

    /// All events for this source in (event_date, event_id) order.
    pub fn load_events(&self) -> Result<Vec<RawEvent>, StoreError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| classify(&self.path, e))?;
        let mut stmt = tx
            .prepare(
                r#"
                SELECT
                    source, event_id, unit_key, event_date, season,
                    home_id, away_id, home_score, away_score,
                    periods_json, home_odds, away_odds
                FROM raw_events
                WHERE source = ?1
                ORDER BY event_date ASC, event_id ASC
                "#,
            )
            .map_err(|e| classify(&self.path, e))?;

        let rows = stmt
            .query_map(params![self.source], |row| {
                Ok(StoredRow {
                    source: row.get(0)?,
                    event_id: row.get(1)?,
                    unit_key: row.get(2)?,
                    event_date: row.get(3)?,
                    season: row.get(4)?,
                    home_id: row.get(5)?,
                    away_id: row.get(6)?,
                    home_score: row.get(7)?,
                    away_score: row.get(8)?,
                    periods_json: row.get(9)?,
                    home_odds: row.get(10)?,
                    away_odds: row.get(11)?,
                })
            })
            .map_err(|e| classify(&self.path, e))?;

        let mut out = Vec::new();
        for row in rows {
            let row = row.map_err(|e| classify(&self.path, e))?;
            out.push(row.into_event(&self.path)?);
        }
        info!(store = %self.path.display(), events = out.len(), "loaded raw events");
        Ok(out)
    }

    pub fn begin_run(&self, units_requested: usize) -> Result<i64, StoreError> {
        self.conn
            .execute(
                "INSERT INTO ingest_runs(source, started_at, finished_at, units_requested, units_collected,
                                         skipped_transient, skipped_permanent, events_written, errors_json)
                 VALUES (?1, ?2, NULL, ?3, 0, 0, 0, 0, '[]')",
                params![self.source, Utc::now().to_rfc3339(), units_requested as i64],
            )
            .map_err(|e| classify(&self.path, e))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_run(&self, run_id: i64, record: &IngestRunRecord) -> Result<(), StoreError> {
        let errors_json = serde_json::to_string(&record.errors).unwrap_or_else(|_| "[]".to_string());
        self.conn
            .execute(
                "UPDATE ingest_runs
                 SET finished_at = ?1, units_requested = ?2, units_collected = ?3,
                     skipped_transient = ?4, skipped_permanent = ?5, events_written = ?6,
                     errors_json = ?7
                 WHERE run_id = ?8",
                params![
                    Utc::now().to_rfc3339(),
                    record.units_requested as i64,
                    record.units_collected as i64,
                    record.skipped_transient as i64,
                    record.skipped_permanent as i64,
                    record.events_written as i64,
                    errors_json,
                    run_id
                ],
            )
            .map_err(|e| classify(&self.path, e))?;
        Ok(())
    }
}

/// Same game as far as the ledger is concerned.
fn same_game(a: &RawEvent, b: &GameKey) -> bool {
    a.event_date.format(DATE_FMT).to_string() == b.event_date
        && a.home_id == b.home_id
        && a.away_id == b.away_id
        && i64::from(a.home_score) == b.home_score
        && i64::from(a.away_score) == b.away_score
}

struct GameKey {
    unit_key: String,
    event_date: String,
    home_id: String,
    away_id: String,
    home_score: i64,
    away_score: i64,
}

impl GameKey {
    fn of(ev: &RawEvent, unit_key: &str) -> Self {
        Self {
            unit_key: unit_key.to_string(),
            event_date: ev.event_date.format(DATE_FMT).to_string(),
            home_id: ev.home_id.clone(),
            away_id: ev.away_id.clone(),
            home_score: i64::from(ev.home_score),
            away_score: i64::from(ev.away_score),
        }
    }
}

/// First event in `events` whose id already names a different game, either
/// earlier in the same batch or in the store.
fn find_conflict(
    tx: &rusqlite::Transaction<'_>,
    source: &str,
    unit_key: &str,
    events: &[RawEvent],
) -> Result<Option<EventConflict>, rusqlite::Error> {
    let mut seen: HashMap<&str, GameKey> = HashMap::new();
    let mut stmt = tx.prepare_cached(
        "SELECT unit_key, event_date, home_id, away_id, home_score, away_score
         FROM raw_events WHERE source = ?1 AND event_id = ?2",
    )?;
    for ev in events {
        let existing = match seen.remove(ev.event_id.as_str()) {
            Some(prev) => Some(prev),
            None => stmt
                .query_row(params![source, ev.event_id], |row| {
                    Ok(GameKey {
                        unit_key: row.get(0)?,
                        event_date: row.get(1)?,
                        home_id: row.get(2)?,
                        away_id: row.get(3)?,
                        home_score: row.get(4)?,
                        away_score: row.get(5)?,
                    })
                })
                .optional()?,
        };
        if let Some(stored) = existing {
            if !same_game(ev, &stored) {
                return Ok(Some(EventConflict {
                    unit_key: unit_key.to_string(),
                    event_id: ev.event_id.clone(),
                    stored_unit_key: stored.unit_key,
                }));
            }
            seen.insert(ev.event_id.as_str(), stored);
        } else {
            seen.insert(ev.event_id.as_str(), GameKey::of(ev, unit_key));
        }
    }
    Ok(None)
}

struct StoredRow {
    source: String,
    event_id: String,
    unit_key: String,
    event_date: String,
    season: Option<String>,
    home_id: String,
    away_id: String,
    home_score: i64,
    away_score: i64,
    periods_json: String,
    home_odds: Option<f64>,
    away_odds: Option<f64>,
}

impl StoredRow {
    fn into_event(self, path: &Path) -> Result<RawEvent, StoreError> {
        let event_date = NaiveDate::parse_from_str(&self.event_date, DATE_FMT).map_err(|_| {
            StoreError::corrupt(
                path,
                format!("event {} has invalid date {:?}", self.event_id, self.event_date),
            )
        })?;
        let score = |v: i64| {
            u32::try_from(v).map_err(|_| {
                StoreError::corrupt(path, format!("event {} has invalid score {v}", self.event_id))
            })
        };
        let periods: Vec<PeriodScore> = serde_json::from_str(&self.periods_json).map_err(|e| {
            StoreError::corrupt(path, format!("event {} periods: {e}", self.event_id))
        })?;
        Ok(RawEvent {
            home_score: score(self.home_score)?,
            away_score: score(self.away_score)?,
            source: self.source,
            event_id: self.event_id,
            unit_key: self.unit_key,
            event_date,
            season: self.season,
            home_id: self.home_id,
            away_id: self.away_id,
            periods,
            home_odds: self.home_odds,
            away_odds: self.away_odds,
        })
    }
}

fn classify(path: &Path, err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
            StoreError::corrupt(path, err.to_string())
        }
        _ => StoreError::sqlite(path, err),
    }
}
