use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backtest::Target;
use crate::error::ConfigError;
use crate::features::SideAssignment;
use crate::splits::PeriodKey;

const ENV_PREFIX: &str = "PIPELINE_";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; sports-backtest/0.1)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Nhl,
    Mlb,
    Local,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nhl" => Ok(SourceKind::Nhl),
            "mlb" => Ok(SourceKind::Mlb),
            "local" => Ok(SourceKind::Local),
            other => Err(format!("unknown source kind {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Partition name; also the subdirectory under `data_dir`.
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
    /// When non-empty, collection units are (date, entity) pairs.
    #[serde(default)]
    pub entities: Vec<String>,
}

impl SourceSpec {
    pub fn new(name: &str, kind: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            base_url: None,
            local_dir: None,
            entities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Completed units buffered before one durable flush.
    pub flush_every: usize,
    /// Bounded queue between a fetch worker and its store writer.
    pub queue_depth: usize,
    pub rate_limit_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            flush_every: 10,
            queue_depth: 32,
            rate_limit_ms: 1_000,
            max_attempts: 4,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
            timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Number of strictly prior games in each rolling window.
    pub window: usize,
    pub side_assignment: SideAssignment,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window: 5,
            side_assignment: SideAssignment::HomeAway,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub period_key: PeriodKey,
    pub min_train_size: usize,
    pub stake: f64,
    pub targets: Vec<Target>,
    pub l2: f64,
    pub learning_rate: f64,
    pub epochs: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            period_key: PeriodKey::CalendarYear,
            min_train_size: 200,
            stake: 1.0,
            targets: vec![Target::HomeWin, Target::PointDiff, Target::TotalPoints],
            l2: 1.0,
            learning_rate: 0.1,
            epochs: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub sources: Vec<SourceSpec>,
    pub collect: CollectConfig,
    pub features: FeatureConfig,
    pub backtest: BacktestConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sources: vec![SourceSpec::new("nhl", SourceKind::Nhl)],
            collect: CollectConfig::default(),
            features: FeatureConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the optional JSON file, then `PIPELINE_*` environment
    /// variables (after loading `.env.local` / `.env`).
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        let mut cfg = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env_with(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = get("SOURCES") {
            self.sources = parse_sources(&v)?;
        }
        if let Some(v) = get("FLUSH_EVERY") {
            self.collect.flush_every = parse_num("FLUSH_EVERY", &v)?;
        }
        if let Some(v) = get("QUEUE_DEPTH") {
            self.collect.queue_depth = parse_num("QUEUE_DEPTH", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_MS") {
            self.collect.rate_limit_ms = parse_num("RATE_LIMIT_MS", &v)?;
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            self.collect.max_attempts = parse_num("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("TIMEOUT_SECS") {
            self.collect.timeout_secs = parse_num("TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("WINDOW") {
            self.features.window = parse_num("WINDOW", &v)?;
        }
        if let Some(v) = get("SIDE_SEED") {
            self.features.side_assignment = SideAssignment::Seeded {
                seed: parse_num("SIDE_SEED", &v)?,
            };
        }
        if let Some(v) = get("MIN_TRAIN_SIZE") {
            self.backtest.min_train_size = parse_num("MIN_TRAIN_SIZE", &v)?;
        }
        if let Some(v) = get("SEASON_START_MONTH") {
            self.backtest.period_key = PeriodKey::SeasonStartMonth(parse_num("SEASON_START_MONTH", &v)?);
        }
        if let Some(v) = get("STAKE") {
            self.backtest.stake = parse_num("STAKE", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::invalid("sources", "at least one source is required"));
        }
        let mut names = std::collections::HashSet::new();
        for src in &self.sources {
            if src.name.trim().is_empty() || src.name.contains(['/', '\\']) {
                return Err(ConfigError::invalid("sources", format!("bad source name {:?}", src.name)));
            }
            if !names.insert(src.name.as_str()) {
                return Err(ConfigError::invalid("sources", format!("duplicate source {}", src.name)));
            }
            if src.kind == SourceKind::Local && src.local_dir.is_none() {
                return Err(ConfigError::invalid(
                    "sources",
                    format!("local source {} needs local_dir", src.name),
                ));
            }
        }
        if self.collect.flush_every == 0 {
            return Err(ConfigError::invalid("collect.flush_every", "must be >= 1"));
        }
        if self.collect.queue_depth == 0 {
            return Err(ConfigError::invalid("collect.queue_depth", "must be >= 1"));
        }
        if self.collect.max_attempts == 0 {
            return Err(ConfigError::invalid("collect.max_attempts", "must be >= 1"));
        }
        if self.features.window == 0 {
            return Err(ConfigError::invalid("features.window", "must be >= 1"));
        }
        if let PeriodKey::SeasonStartMonth(m) = self.backtest.period_key
            && !(1..=12).contains(&m)
        {
            return Err(ConfigError::invalid("backtest.period_key", format!("month {m} out of range")));
        }
        if !(self.backtest.stake.is_finite() && self.backtest.stake > 0.0) {
            return Err(ConfigError::invalid("backtest.stake", "must be a positive number"));
        }
        if self.backtest.targets.is_empty() {
            return Err(ConfigError::invalid("backtest.targets", "at least one target is required"));
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.data_dir.join(source)
    }

    pub fn raw_store_path(&self, source: &str) -> PathBuf {
        self.source_dir(source).join("raw_events.sqlite")
    }

    pub fn feature_store_path(&self, source: &str) -> PathBuf {
        self.source_dir(source).join("features.sqlite")
    }

    pub fn backtest_db_path(&self, source: &str) -> PathBuf {
        self.source_dir(source).join("backtest.sqlite")
    }

    pub fn backtest_workbook_path(&self, source: &str, target: Target) -> PathBuf {
        self.source_dir(source)
            .join(format!("backtest_{}.xlsx", target.as_str()))
    }
}

/// `nhl`, `mlb`, or `name:kind[:path]` entries separated by commas.
fn parse_sources(raw: &str) -> Result<Vec<SourceSpec>, ConfigError> {
    let mut out = Vec::new();
    for part in raw.split([',', ';']).map(str::trim).filter(|p| !p.is_empty()) {
        let mut fields = part.splitn(3, ':');
        let name = fields.next().unwrap_or_default();
        let kind_raw = fields.next().unwrap_or(name);
        let kind = kind_raw
            .parse::<SourceKind>()
            .map_err(|e| ConfigError::invalid("SOURCES", e))?;
        let mut spec = SourceSpec::new(name, kind);
        spec.local_dir = fields.next().map(PathBuf::from);
        out.push(spec);
    }
    Ok(out)
}

fn parse_num<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse {raw:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PIPELINE_DATA_DIR", "/tmp/x"),
            ("PIPELINE_WINDOW", "3"),
            ("PIPELINE_SIDE_SEED", "42"),
            ("PIPELINE_SEASON_START_MONTH", "10"),
            ("PIPELINE_SOURCES", "nhl, atp:local:/data/atp"),
        ]);
        let mut cfg = PipelineConfig::default();
        cfg.apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(cfg.features.window, 3);
        assert_eq!(cfg.features.side_assignment, SideAssignment::Seeded { seed: 42 });
        assert_eq!(cfg.backtest.period_key, PeriodKey::SeasonStartMonth(10));
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.sources[1].kind, SourceKind::Local);
        assert_eq!(cfg.sources[1].local_dir, Some(PathBuf::from("/data/atp")));
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut cfg = PipelineConfig::default();
        let err = cfg
            .apply_env_with(|k| (k == "PIPELINE_WINDOW").then(|| "five".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("WINDOW"));
    }

    #[test]
    fn json_file_merges_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"features": {"window": 10}, "backtest": {"min_train_size": 50, "period_key": {"season_start_month": 9}}}"#,
        )
        .unwrap();
        let cfg = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.features.window, 10);
        assert_eq!(cfg.backtest.min_train_size, 50);
        assert_eq!(cfg.backtest.period_key, PeriodKey::SeasonStartMonth(9));
        assert_eq!(cfg.collect.flush_every, 10);
    }

    #[test]
    fn local_source_requires_dir() {
        let mut cfg = PipelineConfig::default();
        cfg.sources = vec![SourceSpec::new("atp", SourceKind::Local)];
        assert!(cfg.validate().is_err());
    }
}
