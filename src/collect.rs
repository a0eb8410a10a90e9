use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, sync_channel};
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::checkpoint::CheckpointLedger;
use crate::config::{CollectConfig, PipelineConfig};
use crate::connector::{Connector, EventSource, FetchOutcome};
use crate::error::StoreError;
use crate::events::{CollectionUnit, DateRange};
use crate::raw_store::{AppendSummary, IngestRunRecord, RawEventStore, UnitBatch};
use crate::report::RunCounts;
use crate::sources::{build_source, requested_units};

/// Cooperative stop signal, honored only between units.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    pub flush_every: usize,
    pub queue_depth: usize,
    /// Stop after this many units have been attempted in this run.
    pub max_units: Option<usize>,
}

impl CollectOptions {
    pub fn from_config(cfg: &CollectConfig, max_units: Option<usize>) -> Self {
        Self {
            flush_every: cfg.flush_every.max(1),
            queue_depth: cfg.queue_depth.max(1),
            max_units,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectReport {
    pub source: String,
    pub store_path: PathBuf,
    pub units_requested: usize,
    pub units_already_collected: usize,
    pub units_pending: usize,
    pub units_attempted: usize,
    /// Units durably written this run, including units with no events.
    pub collected: usize,
    pub no_data: usize,
    pub events_written: usize,
    pub events_duplicate: usize,
    /// Units refused because an event id named a different stored game. They
    /// are also counted in `skipped_permanent` and stay pending.
    pub units_conflicting: usize,
    pub skipped_transient: usize,
    pub skipped_permanent: usize,
    pub stopped_early: bool,
    pub errors: Vec<String>,
}

impl CollectReport {
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            collected: self.collected,
            duplicate_events: self.events_duplicate,
            conflicting_units: self.units_conflicting,
            skipped_transient: self.skipped_transient,
            skipped_permanent: self.skipped_permanent,
            ..RunCounts::default()
        }
    }
}

/// Collects every pending unit of `requested` into `store`.
///
/// The calling thread fetches; a scoped writer thread owns the store and
/// flushes every `flush_every` completed units in one transaction. When the
/// fetch side stops (done, cancelled or out of budget) the writer drains the
/// queue and flushes what it holds, so only whole units are ever written.
pub fn collect_source<S: EventSource>(
    store: &mut RawEventStore,
    connector: &mut Connector<S>,
    requested: &[CollectionUnit],
    opts: &CollectOptions,
    cancel: &CancelToken,
) -> Result<CollectReport> {
    let ledger = CheckpointLedger::load(store)
        .with_context(|| format!("load checkpoint ledger for {}", store.source()))?;
    let pending = ledger.pending_units(requested);
    let distinct = requested.iter().map(CollectionUnit::key).collect::<BTreeSet<_>>();

    let mut report = CollectReport {
        source: store.source().to_string(),
        store_path: store.path().to_path_buf(),
        units_requested: distinct.len(),
        units_already_collected: distinct.len().saturating_sub(pending.len()),
        units_pending: pending.len(),
        ..CollectReport::default()
    };
    info!(
        source = %report.source,
        requested = report.units_requested,
        already_collected = report.units_already_collected,
        pending = report.units_pending,
        "starting collection"
    );

    let run_id = store
        .begin_run(pending.len())
        .context("record ingest run start")?;

    let flush_every = opts.flush_every.max(1);
    let (tx, rx) = sync_channel::<UnitBatch>(opts.queue_depth.max(1));

    let written = thread::scope(|scope| -> Result<AppendSummary> {
        let writer_store = &mut *store;
        let writer = scope.spawn(move || run_writer(writer_store, rx, flush_every));

        for unit in &pending {
            if cancel.is_cancelled() {
                report.stopped_early = true;
                info!(source = %report.source, next = %unit, "cancelled at unit boundary");
                break;
            }
            if let Some(budget) = opts.max_units
                && report.units_attempted >= budget
            {
                report.stopped_early = true;
                info!(source = %report.source, budget, next = %unit, "unit budget reached");
                break;
            }
            report.units_attempted += 1;

            let events = match connector.fetch(unit) {
                FetchOutcome::Fetched(events) => events,
                FetchOutcome::NoData => {
                    report.no_data += 1;
                    Vec::new()
                }
                FetchOutcome::SkippedTransient { attempts, reason } => {
                    report.skipped_transient += 1;
                    report
                        .errors
                        .push(format!("{unit}: transient after {attempts} attempts: {reason}"));
                    continue;
                }
                FetchOutcome::SkippedPermanent { reason } => {
                    report.skipped_permanent += 1;
                    report.errors.push(format!("{unit}: permanent: {reason}"));
                    continue;
                }
            };

            let batch = UnitBatch {
                unit: unit.clone(),
                events,
            };
            if tx.send(batch).is_err() {
                // Writer is gone; its error surfaces from join below.
                report.stopped_early = true;
                break;
            }
        }
        drop(tx);

        let joined = writer
            .join()
            .map_err(|_| anyhow!("store writer for {} panicked", report.source))?;
        Ok(joined?)
    })?;

    report.collected = written.units_written;
    report.events_written = written.events_inserted;
    report.events_duplicate = written.events_duplicate;
    report.units_conflicting = written.conflicts.len();
    report.skipped_permanent += written.conflicts.len();
    report
        .errors
        .extend(written.conflicts.iter().map(ToString::to_string));

    store
        .finish_run(
            run_id,
            &IngestRunRecord {
                units_requested: report.units_pending,
                units_collected: report.collected,
                skipped_transient: report.skipped_transient,
                skipped_permanent: report.skipped_permanent,
                events_written: report.events_written,
                errors: report.errors.clone(),
            },
        )
        .context("record ingest run finish")?;

    info!(
        source = %report.source,
        collected = report.collected,
        events = report.events_written,
        duplicate = report.events_duplicate,
        skipped_transient = report.skipped_transient,
        skipped_permanent = report.skipped_permanent,
        stopped_early = report.stopped_early,
        "collection finished"
    );
    Ok(report)
}

fn run_writer(
    store: &mut RawEventStore,
    rx: Receiver<UnitBatch>,
    flush_every: usize,
) -> Result<AppendSummary, StoreError> {
    let mut total = AppendSummary::default();
    let mut buffer: Vec<UnitBatch> = Vec::with_capacity(flush_every);
    for batch in rx {
        buffer.push(batch);
        if buffer.len() >= flush_every {
            flush(store, &mut buffer, &mut total)?;
        }
    }
    if !buffer.is_empty() {
        flush(store, &mut buffer, &mut total)?;
    }
    Ok(total)
}

fn flush(
    store: &mut RawEventStore,
    buffer: &mut Vec<UnitBatch>,
    total: &mut AppendSummary,
) -> Result<(), StoreError> {
    let summary = store.append_units(buffer)?;
    info!(
        source = store.source(),
        units = summary.units_written,
        events = summary.events_inserted,
        "flushed units"
    );
    if summary.units_already_present > 0 {
        warn!(
            source = store.source(),
            units = summary.units_already_present,
            "flush contained units already in the store"
        );
    }
    total.absorb(summary);
    buffer.clear();
    Ok(())
}

/// Runs every configured source (or the `only` subset) concurrently, one
/// fetch worker and one store writer per source. Stores are opened up front
/// so a corrupt partition aborts the run before any source starts.
pub fn collect_all(
    cfg: &PipelineConfig,
    only: Option<&[String]>,
    range: &DateRange,
    max_units: Option<usize>,
    cancel: &CancelToken,
) -> Result<Vec<CollectReport>> {
    let specs = cfg
        .sources
        .iter()
        .filter(|spec| only.is_none_or(|names| names.iter().any(|n| n == &spec.name)))
        .collect::<Vec<_>>();
    if specs.is_empty() {
        return Err(anyhow!("no configured source matches the request"));
    }

    let opts = CollectOptions::from_config(&cfg.collect, max_units);
    let mut jobs = Vec::with_capacity(specs.len());
    for spec in specs {
        let path = cfg.raw_store_path(&spec.name);
        let store = RawEventStore::open(&path, &spec.name)
            .with_context(|| format!("open raw store for {}", spec.name))?;
        let source = build_source(spec, &cfg.collect)?;
        let connector = Connector::from_config(source, &cfg.collect);
        jobs.push((store, connector, requested_units(spec, range)));
    }

    let results = thread::scope(|scope| {
        let handles = jobs
            .into_iter()
            .map(|(mut store, mut connector, units)| {
                let opts = &opts;
                scope.spawn(move || collect_source(&mut store, &mut connector, &units, opts, cancel))
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(anyhow!("collection worker panicked")))
            })
            .collect::<Vec<_>>()
    });

    results.into_iter().collect()
}
