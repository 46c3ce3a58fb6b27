use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Weekday};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::earnings::mlp::MlpParams;
use crate::earnings::spec::LookaheadMode;
use crate::pipeline::PanelParams;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    pub cds: CdsConfig,
    pub equity: EquityConfig,
    pub robustness: RobustnessConfig,
    pub output: OutputConfig,
    pub earnings: EarningsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CdsConfig {
    pub path: PathBuf,
    pub boxcar_window: usize,
    pub ew_window: usize,
    pub ew_half_life: f64,
    #[serde(default = "default_weekday")]
    pub resample_weekday: String,
    #[serde(default = "default_market_symbol")]
    pub market_symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EquityConfig {
    pub cache_path: PathBuf,
    #[serde(default = "default_feed_base_url")]
    pub feed_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RobustnessConfig {
    pub windows: Vec<usize>,
    pub half_lives: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default = "default_event_top_n")]
    pub event_top_n: usize,
    #[serde(default = "default_rolling_rmse_weeks")]
    pub rolling_rmse_weeks: usize,
    #[serde(default = "default_true")]
    pub charts: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EarningsConfig {
    pub panel_path: PathBuf,
    pub output_dir: PathBuf,
    /// Directory holding the random-forest baselines, one per lookahead mode.
    #[serde(default)]
    pub rf_forecasts_dir: Option<PathBuf>,
    #[serde(default)]
    pub mode: LookaheadMode,
    #[serde(default = "default_train_window_months")]
    pub train_window_months: u32,
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    #[serde(default = "default_verbose_every")]
    pub verbose_every: usize,
    #[serde(default)]
    pub mlp: MlpParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_weekday() -> String {
    "wed".to_string()
}

fn default_market_symbol() -> String {
    "SPY".to_string()
}

fn default_feed_base_url() -> String {
    crate::feed::yahoo::DEFAULT_BASE_URL.to_string()
}

fn default_event_top_n() -> usize {
    10
}

fn default_rolling_rmse_weeks() -> usize {
    12
}

fn default_true() -> bool {
    true
}

fn default_train_window_months() -> u32 {
    12
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1986, 1, 31).unwrap_or_default()
}

fn default_verbose_every() -> usize {
    12
}

/// Parse a weekday name ("wed", "Wednesday", "W-WED") into a `Weekday`.
pub fn parse_weekday(s: &str) -> Result<Weekday> {
    let trimmed = s.trim();
    let name = trimmed
        .strip_prefix("W-")
        .or_else(|| trimmed.strip_prefix("w-"))
        .unwrap_or(trimmed);
    if name.is_empty() {
        bail!("invalid weekday '{}': expected a name like 'wed'", s);
    }
    name.parse::<Weekday>()
        .map_err(|_| anyhow::anyhow!("invalid weekday '{}': expected mon..sun", s))
}

impl Config {
    /// Loads `.env`, then the TOML file named by `BASIS_LAB_CONFIG`
    /// (default `config/default.toml`), then single-field env overrides.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config_path = std::env::var("BASIS_LAB_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&config_path)
    }

    /// Same as [`Config::load`] but with an explicit config file.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_path(config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&config_str).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("invalid config toml")?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("BASIS_LAB_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output.dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var("EQUITY_FEED_BASE_URL") {
            if !url.trim().is_empty() {
                self.equity.feed_base_url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cds.boxcar_window == 0 {
            bail!("cds.boxcar_window must be > 0");
        }
        if self.cds.ew_window == 0 {
            bail!("cds.ew_window must be > 0");
        }
        if !(self.cds.ew_half_life > 0.0) {
            bail!("cds.ew_half_life must be > 0");
        }
        if self.cds.market_symbol.trim().is_empty() {
            bail!("cds.market_symbol must not be empty");
        }
        parse_weekday(&self.cds.resample_weekday).context("cds.resample_weekday is invalid")?;
        if self.robustness.windows.is_empty() || self.robustness.half_lives.is_empty() {
            bail!("robustness.windows and robustness.half_lives must not be empty");
        }
        if self.robustness.windows.iter().any(|w| *w == 0) {
            bail!("robustness.windows entries must be > 0");
        }
        if self.robustness.half_lives.iter().any(|h| !(*h > 0.0)) {
            bail!("robustness.half_lives entries must be > 0");
        }
        if self.earnings.train_window_months == 0 {
            bail!("earnings.train_window_months must be > 0");
        }
        self.earnings
            .mlp
            .validate()
            .context("earnings.mlp is invalid")?;
        Ok(())
    }

    /// Resolves a configured path against `root` unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn cds_path(&self) -> PathBuf {
        self.resolve(&self.cds.path)
    }

    pub fn equity_cache_path(&self) -> PathBuf {
        self.resolve(&self.equity.cache_path)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.output.dir)
    }

    pub fn robustness_dir(&self) -> PathBuf {
        self.output_dir().join("robustness")
    }

    pub fn resample_weekday(&self) -> Result<Weekday> {
        parse_weekday(&self.cds.resample_weekday)
    }

    /// Baseline forecasts for `mode`: `<rf_forecasts_dir>/<stem>.parquet`, or
    /// the `.csv` next to it when only that exists.
    pub fn rf_forecasts_path(&self, mode: LookaheadMode) -> Option<PathBuf> {
        let dir = self.resolve(self.earnings.rf_forecasts_dir.as_deref()?);
        let parquet = dir.join(format!("{}.parquet", mode.rf_file_stem()));
        let csv = parquet.with_extension("csv");
        if !parquet.exists() && csv.exists() {
            Some(csv)
        } else {
            Some(parquet)
        }
    }

    pub fn panel_params(&self) -> PanelParams {
        PanelParams {
            boxcar_window: self.cds.boxcar_window,
            ew_window: self.cds.ew_window,
            ew_half_life: self.cds.ew_half_life,
        }
    }
}
