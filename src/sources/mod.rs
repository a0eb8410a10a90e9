//! Provider adapters behind [`EventSource`](crate::connector::EventSource).

pub mod local;
pub mod mlb;
pub mod nhl;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::config::{CollectConfig, SourceKind, SourceSpec};
use crate::connector::EventSource;
use crate::events::{CollectionUnit, DateRange};
use crate::http_client::http_client;

pub fn build_source(spec: &SourceSpec, cfg: &CollectConfig) -> Result<Box<dyn EventSource>> {
    let source: Box<dyn EventSource> = match spec.kind {
        SourceKind::Nhl => Box::new(nhl::NhlSource::new(
            &spec.name,
            http_client(cfg)?,
            spec.base_url.as_deref(),
        )),
        SourceKind::Mlb => Box::new(mlb::MlbSource::new(
            &spec.name,
            http_client(cfg)?,
            spec.base_url.as_deref(),
        )),
        SourceKind::Local => {
            let dir = spec
                .local_dir
                .clone()
                .ok_or_else(|| anyhow!("local source {} has no local_dir", spec.name))?;
            Box::new(local::LocalDirSource::new(&spec.name, dir))
        }
    };
    Ok(source)
}

/// Units requested for a range: one per date, or one per (date, entity) when
/// the source is configured with entities.
pub fn requested_units(spec: &SourceSpec, range: &DateRange) -> Vec<CollectionUnit> {
    if spec.entities.is_empty() {
        range.date_units()
    } else {
        range.entity_units(&spec.entities)
    }
}

pub(crate) fn unit_matches(unit: &CollectionUnit, home: &str, away: &str) -> bool {
    match unit.entity() {
        None => true,
        Some(entity) => entity == home || entity == away,
    }
}

pub(crate) fn as_u64_any(v: &Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    v.as_str()?.trim().parse::<u64>().ok()
}

pub(crate) fn as_u32_any(v: &Value) -> Option<u32> {
    let n = as_u64_any(v)?;
    u32::try_from(n).ok()
}

/// Ids arrive as numbers or strings depending on the provider.
pub(crate) fn as_id_string(v: &Value) -> Option<String> {
    if let Some(n) = v.as_u64() {
        return Some(n.to_string());
    }
    let s = v.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}
