use gapwatch_domain::{BoundaryRule, DetectionMode, Timeframe};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub symbol: String,
    pub base_timeframe: Timeframe,
    pub derived_timeframes: Vec<Timeframe>,
    /// Bars kept in memory per series.
    pub cache_size: usize,
    /// Bars requested from the source on every tick.
    pub fetch_limit: usize,
    /// Bars examined by the recent-gap summary.
    pub summary_bars: usize,
    pub mode: DetectionMode,
    pub boundary_rule: BoundaryRule,
    pub grid_tolerance_secs: i64,
    /// Derived timeframes are normally built from base bars only.
    pub fetch_derived_from_source: bool,
    pub data_dir: PathBuf,
    pub ledger_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbol: String::from("BTC_USDT"),
            base_timeframe: Timeframe::H1,
            derived_timeframes: vec![Timeframe::H4, Timeframe::D1],
            cache_size: 200,
            fetch_limit: 48,
            summary_bars: 15,
            mode: DetectionMode::default(),
            boundary_rule: BoundaryRule::default(),
            grid_tolerance_secs: 0,
            fetch_derived_from_source: false,
            data_dir: PathBuf::from("./data"),
            ledger_path: PathBuf::from("./data/gaps.json"),
        }
    }
}

impl MonitorConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Base first, then derived in configured order.
    pub fn timeframes(&self) -> Vec<Timeframe> {
        let mut all = vec![self.base_timeframe];
        for tf in &self.derived_timeframes {
            if !all.contains(tf) {
                all.push(*tf);
            }
        }
        all
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("symbol cannot be empty".to_string()));
        }
        if self.fetch_limit == 0 {
            return Err(ConfigError::Invalid("fetch_limit must be positive".to_string()));
        }
        if self.summary_bars < 3 {
            return Err(ConfigError::Invalid(
                "summary_bars must cover at least three bars".to_string(),
            ));
        }

        let mut min_cache = 3usize;
        for tf in &self.derived_timeframes {
            let slots = tf.slots_of(self.base_timeframe).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{} cannot be built from {} bars",
                    tf, self.base_timeframe
                ))
            })?;
            min_cache = min_cache.max(slots as usize);
        }
        if self.cache_size < min_cache {
            return Err(ConfigError::Invalid(format!(
                "cache_size {} is below the {} bars one derived window needs",
                self.cache_size, min_cache
            )));
        }

        if self.grid_tolerance_secs < 0
            || self.grid_tolerance_secs * 2 >= self.base_timeframe.seconds()
        {
            return Err(ConfigError::Invalid(format!(
                "grid_tolerance_secs must be in [0, {})",
                self.base_timeframe.seconds() / 2
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
