use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;

use crate::events::parse_date;

/// Minimal `--name value` / `--name=value` flag reader shared by the binaries.
#[derive(Debug, Clone, Default)]
pub struct Args {
    args: Vec<String>,
}

impl Args {
    pub fn from_env() -> Self {
        Self::new(std::env::args().skip(1))
    }

    pub fn new(args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn value(&self, name: &str) -> Option<String> {
        let prefix = format!("{name}=");
        for (idx, arg) in self.args.iter().enumerate() {
            if let Some(raw) = arg.strip_prefix(&prefix) {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
            if arg == name
                && let Some(next) = self.args.get(idx + 1)
                && !next.trim().is_empty()
                && !next.starts_with("--")
            {
                return Some(next.trim().to_string());
            }
        }
        None
    }

    /// `Ok(None)` when the flag is absent; a present but unparseable value is
    /// an error rather than a silent fallback to the default.
    pub fn parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.value(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|_| anyhow!("invalid value for {name}: cannot parse {raw:?}"))
            })
            .transpose()
    }

    pub fn path(&self, name: &str) -> Option<PathBuf> {
        self.value(name).map(PathBuf::from)
    }

    pub fn date(&self, name: &str) -> Result<Option<NaiveDate>> {
        self.value(name)
            .map(|raw| {
                parse_date(&raw)
                    .ok_or_else(|| anyhow!("invalid value for {name}: expected YYYY-MM-DD, got {raw:?}"))
            })
            .transpose()
    }

    pub fn list(&self, name: &str) -> Option<Vec<String>> {
        let raw = self.value(name)?;
        let items = dedup(
            raw.split([',', ';', ' '])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        );
        (!items.is_empty()).then_some(items)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.args.iter().any(|arg| arg == name)
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}
