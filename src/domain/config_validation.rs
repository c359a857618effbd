//! Configuration validation.
//!
//! Turns the INI sections into validated configuration structs before any
//! data is fetched. Every rejected value names its section and key.

use crate::domain::allocation::{AllocationConstraints, AllocationMethod};
use crate::domain::backtest::{BacktestConfig, DEFAULT_MAX_STALENESS_DAYS};
use crate::domain::dataset::{BuildOptions, DEFAULT_WARMUP_BARS, DEFAULT_WORKERS};
use crate::domain::error::PitraderError;
use crate::domain::indicator::IndicatorType;
use crate::domain::strategy::{RebalanceFrequency, StrategyConfig};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

type Result<T> = std::result::Result<T, PitraderError>;

const DEFAULT_TURNOVER_COST_BPS: f64 = 10.0;
const DEFAULT_POOL_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Csv,
    Sqlite,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Csv => f.write_str("csv"),
            DataSource::Sqlite => f.write_str("sqlite"),
        }
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(DataSource::Csv),
            "sqlite" => Ok(DataSource::Sqlite),
            other => Err(format!("unknown data source '{}' (expected csv or sqlite)", other)),
        }
    }
}

/// Where prices and universe timelines come from.
#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
    pub source: DataSource,
    pub price_dir: Option<PathBuf>,
    pub universe_dir: Option<PathBuf>,
    /// Extra price directories tried in order when the primary has no data.
    pub fallback_dirs: Vec<PathBuf>,
    pub sqlite_path: Option<PathBuf>,
    pub pool_size: u32,
    pub workers: usize,
    pub warmup_bars: usize,
}

impl DataConfig {
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            warmup_bars: self.warmup_bars,
            workers: self.workers,
            indicators: Vec::new(),
        }
    }
}

/// Everything a run needs, validated together.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub data: DataConfig,
    pub backtest: BacktestConfig,
    pub strategy: StrategyConfig,
    pub universe_id: String,
}

pub fn validate_run_config(config: &dyn ConfigPort) -> Result<RunConfig> {
    Ok(RunConfig {
        data: validate_data_config(config)?,
        backtest: validate_backtest_config(config)?,
        strategy: validate_strategy_config(config)?,
        universe_id: universe_id(config)?,
    })
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig> {
    let (start_date, end_date) = validate_dates(config)?;

    let initial_capital = read_f64(config, "backtest", "initial_capital", 0.0)?;
    if initial_capital <= 0.0 {
        return Err(PitraderError::config_invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }

    let bps = read_f64(config, "backtest", "turnover_cost_bps", DEFAULT_TURNOVER_COST_BPS)?;
    if !(0.0..=10_000.0).contains(&bps) {
        return Err(PitraderError::config_invalid(
            "backtest",
            "turnover_cost_bps",
            "turnover_cost_bps must be between 0 and 10000",
        ));
    }

    let risk_free_rate = read_f64(config, "backtest", "risk_free_rate", 0.0)?;
    if !(0.0..1.0).contains(&risk_free_rate) {
        return Err(PitraderError::config_invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }

    let max_price_staleness_days = read_i64(
        config,
        "backtest",
        "max_price_staleness_days",
        DEFAULT_MAX_STALENESS_DAYS,
    )?;
    if max_price_staleness_days < 0 {
        return Err(PitraderError::config_invalid(
            "backtest",
            "max_price_staleness_days",
            "max_price_staleness_days must be non-negative",
        ));
    }

    Ok(BacktestConfig {
        start_date,
        end_date,
        initial_capital,
        turnover_cost_per_unit: bps / 10_000.0,
        risk_free_rate,
        max_price_staleness_days,
    })
}

/// The `[backtest] universe` identifier.
pub fn universe_id(config: &dyn ConfigPort) -> Result<String> {
    required_string(config, "backtest", "universe")
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<StrategyConfig> {
    let name = config
        .get_string("strategy", "name")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unnamed".to_string());

    let raw = required_string(config, "strategy", "indicators")?;
    let indicator_weights = parse_indicator_weights(&raw)?;

    let allocation_method = match config.get_string("strategy", "allocation") {
        Some(s) => s
            .parse::<AllocationMethod>()
            .map_err(|e| PitraderError::config_invalid("strategy", "allocation", e))?,
        None => AllocationMethod::RiskParity,
    };

    let rebalancing_frequency = match config.get_string("strategy", "rebalance") {
        Some(s) => s
            .parse::<RebalanceFrequency>()
            .map_err(|e| PitraderError::config_invalid("strategy", "rebalance", e))?,
        None => RebalanceFrequency::Monthly,
    };

    let entry_threshold = read_f64(config, "strategy", "entry_threshold", 0.0)?;
    if !entry_threshold.is_finite() {
        return Err(PitraderError::config_invalid(
            "strategy",
            "entry_threshold",
            "entry_threshold must be finite",
        ));
    }

    let max_positions = match config.get_string("strategy", "max_positions") {
        None => None,
        Some(_) => {
            let value = read_i64(config, "strategy", "max_positions", 0)?;
            if value < 1 {
                return Err(PitraderError::config_invalid(
                    "strategy",
                    "max_positions",
                    "max_positions must be at least 1",
                ));
            }
            Some(value as usize)
        }
    };

    Ok(StrategyConfig {
        name,
        indicator_weights,
        allocation_method,
        rebalancing_frequency,
        entry_threshold,
        max_positions,
        constraints: validate_allocation_config(config)?,
    })
}

pub fn validate_allocation_config(config: &dyn ConfigPort) -> Result<AllocationConstraints> {
    let defaults = AllocationConstraints::default();

    let max_single_allocation = read_f64(
        config,
        "allocation",
        "max_single_allocation",
        defaults.max_single_allocation,
    )?;
    if max_single_allocation <= 0.0 || max_single_allocation > 1.0 {
        return Err(PitraderError::config_invalid(
            "allocation",
            "max_single_allocation",
            "max_single_allocation must be in (0, 1]",
        ));
    }

    let covariance_window = read_usize(
        config,
        "allocation",
        "covariance_window",
        defaults.covariance_window,
    )?;
    if covariance_window < 2 {
        return Err(PitraderError::config_invalid(
            "allocation",
            "covariance_window",
            "covariance_window must be at least 2",
        ));
    }

    let min_history = read_usize(config, "allocation", "min_history", defaults.min_history)?;
    if min_history < 2 || min_history > covariance_window {
        return Err(PitraderError::config_invalid(
            "allocation",
            "min_history",
            "min_history must be between 2 and covariance_window",
        ));
    }

    let max_iterations = read_usize(
        config,
        "allocation",
        "max_iterations",
        defaults.max_iterations,
    )?;
    if max_iterations == 0 {
        return Err(PitraderError::config_invalid(
            "allocation",
            "max_iterations",
            "max_iterations must be at least 1",
        ));
    }

    let tolerance = read_f64(config, "allocation", "tolerance", defaults.tolerance)?;
    if tolerance <= 0.0 || tolerance >= 1.0 {
        return Err(PitraderError::config_invalid(
            "allocation",
            "tolerance",
            "tolerance must be in (0, 1)",
        ));
    }

    Ok(AllocationConstraints {
        max_single_allocation,
        covariance_window,
        min_history,
        max_iterations,
        tolerance,
    })
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<DataConfig> {
    let source = match config.get_string("data", "source") {
        Some(s) => s
            .parse::<DataSource>()
            .map_err(|e| PitraderError::config_invalid("data", "source", e))?,
        None => DataSource::Csv,
    };

    let path = |section: &str, key: &str| {
        config
            .get_string(section, key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    };

    let price_dir = path("data", "price_dir");
    let universe_dir = path("data", "universe_dir");
    let sqlite_path = path("sqlite", "path");

    match source {
        DataSource::Csv => {
            if price_dir.is_none() {
                return Err(PitraderError::config_missing("data", "price_dir"));
            }
            if universe_dir.is_none() {
                return Err(PitraderError::config_missing("data", "universe_dir"));
            }
        }
        DataSource::Sqlite => {
            if sqlite_path.is_none() {
                return Err(PitraderError::config_missing("sqlite", "path"));
            }
        }
    }

    let pool_size = read_usize(config, "sqlite", "pool_size", DEFAULT_POOL_SIZE as usize)?;
    if pool_size == 0 || pool_size > 64 {
        return Err(PitraderError::config_invalid(
            "sqlite",
            "pool_size",
            "pool_size must be between 1 and 64",
        ));
    }

    let workers = read_usize(config, "data", "workers", DEFAULT_WORKERS)?;
    if workers == 0 {
        return Err(PitraderError::config_invalid(
            "data",
            "workers",
            "workers must be at least 1",
        ));
    }

    Ok(DataConfig {
        source,
        price_dir,
        universe_dir,
        fallback_dirs: config
            .get_list("data", "fallback_dirs")
            .into_iter()
            .map(PathBuf::from)
            .collect(),
        sqlite_path,
        pool_size: pool_size as u32,
        workers,
        warmup_bars: read_usize(config, "data", "warmup_bars", DEFAULT_WARMUP_BARS)?,
    })
}

/// Parses `RSI(14):0.5, MACD(12,26,9):0.3` style lists. A missing weight
/// means 1.0. Commas inside parentheses belong to the indicator.
fn parse_indicator_weights(raw: &str) -> Result<BTreeMap<IndicatorType, f64>> {
    let invalid = |reason: String| PitraderError::config_invalid("strategy", "indicators", reason);

    let mut weights = BTreeMap::new();
    for item in split_top_level(raw) {
        let (spec, weight) = match item.rsplit_once(':') {
            Some((spec, weight)) => {
                let weight: f64 = weight
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("weight '{}' is not a number", weight.trim())))?;
                (spec, weight)
            }
            None => (item.as_str(), 1.0),
        };
        if !weight.is_finite() || weight == 0.0 {
            return Err(invalid(format!("weight for '{}' must be finite and non-zero", spec.trim())));
        }
        let indicator = spec
            .parse::<IndicatorType>()
            .map_err(|e| invalid(e.to_string()))?;
        if weights.insert(indicator, weight).is_some() {
            return Err(invalid(format!("{} listed twice", indicator)));
        }
    }

    if weights.is_empty() {
        return Err(invalid("at least one indicator is required".to_string()));
    }
    Ok(weights)
}

fn split_top_level(raw: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in raw.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    items.push(current);
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(NaiveDate, NaiveDate)> {
    let start_str = config.get_string("backtest", "start_date");
    let end_str = config.get_string("backtest", "end_date");

    let start_date = parse_date(start_str.as_deref(), "start_date")?;
    let end_date = parse_date(end_str.as_deref(), "end_date")?;

    if start_date >= end_date {
        return Err(PitraderError::config_invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    Ok((start_date, end_date))
}

pub fn parse_date(value: Option<&str>, field: &str) -> Result<NaiveDate> {
    match value {
        None => Err(PitraderError::config_missing("backtest", field)),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            PitraderError::config_invalid(
                "backtest",
                field,
                format!("invalid {} format, expected YYYY-MM-DD", field),
            )
        }),
    }
}

fn required_string(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(PitraderError::config_missing(section, key)),
    }
}

fn read_f64(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(config.get_double(section, key, v)),
            _ => Err(PitraderError::config_invalid(
                section,
                key,
                format!("'{}' is not a number", raw.trim()),
            )),
        },
    }
}

fn read_i64(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<i64> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(v) => Ok(config.get_int(section, key, v)),
            Err(_) => Err(PitraderError::config_invalid(
                section,
                key,
                format!("'{}' is not an integer", raw.trim()),
            )),
        },
    }
}

fn read_usize(config: &dyn ConfigPort, section: &str, key: &str, default: usize) -> Result<usize> {
    let value = read_i64(config, section, key, default as i64)?;
    usize::try_from(value).map_err(|_| {
        PitraderError::config_invalid(section, key, format!("{} must be non-negative", key))
    })
}
