//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::csv_universe_adapter::CsvUniverseAdapter;
use crate::adapters::fallback_adapter::FallbackDataPort;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestResult, RunStatus};
use crate::domain::config_validation::{
    DataConfig, DataSource, RunConfig, universe_id, validate_data_config, validate_run_config,
};
use crate::domain::dataset::{CancelFlag, DatasetCache, build_complete_dataset};
use crate::domain::error::PitraderError;
use crate::logging::{LogConfig, init_logging};
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;
use crate::ports::universe_port::UniverseTimelinePort;

/// Exit code of a run that stopped early with a `Failed` status.
pub const RUN_FAILED_EXIT: u8 = 7;

#[derive(Parser, Debug)]
#[command(name = "pitrader", about = "Point-in-time universe backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// JSON report path; printed to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Per-period CSV timeline
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Fetch prices and compute indicators without running a backtest
    BuildDataset {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show universe membership as of a date
    Universe {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        date: NaiveDate,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            csv,
        } => run_backtest(&config, output.as_deref(), csv.as_deref()),
        Command::BuildDataset { config } => run_build_dataset(&config),
        Command::Validate { config } => run_validate(&config),
        Command::Universe { config, date } => run_universe(&config, date),
    }
}

/// Loads the INI file and installs logging from its `[logging]` section.
pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    let adapter = FileConfigAdapter::from_file(path).map_err(|e| fail(&e))?;
    if let Err(e) = init_logging(LogConfig::from_config(&adapter)) {
        eprintln!("warning: logging not initialized: {e}");
    }
    Ok(adapter)
}

fn fail(err: &PitraderError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub struct Ports {
    pub universe: Box<dyn UniverseTimelinePort>,
    pub data: Box<dyn DataPort>,
}

/// Wires the configured providers. Fallback directories are appended after
/// the primary source as CSV providers.
pub fn open_ports(data: &DataConfig) -> Result<Ports, PitraderError> {
    let (universe, primary): (Box<dyn UniverseTimelinePort>, Box<dyn DataPort>) = match data.source
    {
        DataSource::Csv => {
            let price_dir = data
                .price_dir
                .clone()
                .ok_or_else(|| PitraderError::config_missing("data", "price_dir"))?;
            let universe_dir = data
                .universe_dir
                .clone()
                .ok_or_else(|| PitraderError::config_missing("data", "universe_dir"))?;
            (
                Box::new(CsvUniverseAdapter::new(universe_dir)),
                Box::new(CsvAdapter::new(price_dir)),
            )
        }
        DataSource::Sqlite => open_sqlite(data)?,
    };

    if data.fallback_dirs.is_empty() {
        return Ok(Ports {
            universe,
            data: primary,
        });
    }

    let mut providers = vec![primary];
    providers.extend(
        data.fallback_dirs
            .iter()
            .map(|dir| Box::new(CsvAdapter::new(dir.clone())) as Box<dyn DataPort>),
    );
    Ok(Ports {
        universe,
        data: Box::new(FallbackDataPort::new(providers)),
    })
}

#[cfg(feature = "sqlite")]
fn open_sqlite(
    data: &DataConfig,
) -> Result<(Box<dyn UniverseTimelinePort>, Box<dyn DataPort>), PitraderError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;
    use std::sync::Arc;

    let path = data
        .sqlite_path
        .as_ref()
        .ok_or_else(|| PitraderError::config_missing("sqlite", "path"))?;
    let adapter = Arc::new(SqliteAdapter::open(path, data.pool_size)?);
    Ok((Box::new(Arc::clone(&adapter)), Box::new(adapter)))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(
    _data: &DataConfig,
) -> Result<(Box<dyn UniverseTimelinePort>, Box<dyn DataPort>), PitraderError> {
    Err(PitraderError::config_invalid(
        "data",
        "source",
        "built without the sqlite feature",
    ))
}

fn run_backtest(config_path: &Path, output_path: Option<&Path>, csv_path: Option<&Path>) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let RunConfig {
        data: data_config,
        backtest: bt_config,
        strategy,
        universe_id: universe,
    } = match validate_run_config(&adapter) {
        Ok(v) => v,
        Err(e) => return fail(&e),
    };

    // Stage 2: Open data sources
    let ports = match open_ports(&data_config) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    // Stage 3: Build dataset and run
    eprintln!(
        "Running {} on {} from {} to {} ({} rebalancing, {})",
        strategy.name,
        universe,
        bt_config.start_date,
        bt_config.end_date,
        strategy.rebalancing_frequency,
        strategy.allocation_method,
    );

    let cache = DatasetCache::new();
    let cancel = CancelFlag::new();
    let result = match backtest_engine::run_backtest(
        ports.universe.as_ref(),
        ports.data.as_ref(),
        &universe,
        &strategy,
        &bt_config,
        &data_config.build_options(),
        &cache,
        &cancel,
    ) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    // Stage 4: Console summary
    print_summary(&result);

    // Stage 5: Reports
    match output_path {
        Some(path) => {
            if let Err(e) = JsonReportAdapter::new().write(&result, path) {
                return fail(&e);
            }
            eprintln!("\nReport written to: {}", path.display());
        }
        None => match JsonReportAdapter::render(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => return fail(&e),
        },
    }

    if let Some(path) = csv_path {
        if let Err(e) = CsvReportAdapter::new().write(&result, path) {
            return fail(&e);
        }
        eprintln!("Period timeline written to: {}", path.display());
    }

    match &result.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Failed { date, reason } => {
            eprintln!("error: backtest failed on {date}: {reason}");
            ExitCode::from(RUN_FAILED_EXIT)
        }
    }
}

pub fn print_summary(result: &BacktestResult) {
    let s = &result.summary;
    eprintln!("\n=== Results ===");
    eprintln!("Periods:          {}", s.period_count);
    eprintln!("Total Return:     {:.2}%", s.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", s.annualized_return * 100.0);
    eprintln!("Volatility:       {:.2}%", s.volatility * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", s.sharpe_ratio);
    eprintln!(
        "Max Drawdown:     -{:.1}% ({} periods)",
        s.max_drawdown * 100.0,
        s.max_drawdown_duration
    );
    eprintln!("Final Value:      {:.2}", s.final_value);

    eprintln!("\n=== Universe ===");
    eprintln!("Average Size:     {:.1}", s.average_universe_size);
    eprintln!("Stability Score:  {:.3}", s.universe_stability_score);
    eprintln!("Turnover Cost:    {:.4}%", s.total_turnover_cost * 100.0);
    eprintln!("Strategy Attrib.: {:+.2}%", s.strategy_attribution * 100.0);
    eprintln!("Universe Attrib.: {:+.2}%", s.universe_attribution * 100.0);
}

fn run_build_dataset(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let RunConfig {
        data: data_config,
        backtest: bt_config,
        strategy,
        universe_id: universe,
    } = match validate_run_config(&adapter) {
        Ok(v) => v,
        Err(e) => return fail(&e),
    };

    let ports = match open_ports(&data_config) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let options = backtest_engine::build_options_for(&strategy, &data_config.build_options());
    let dataset = match build_complete_dataset(
        ports.universe.as_ref(),
        ports.data.as_ref(),
        &universe,
        bt_config.start_date,
        bt_config.end_date,
        &options,
        &CancelFlag::new(),
    ) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };

    println!("universe:      {}", dataset.universe_id);
    println!("snapshots:     {}", dataset.universe.len());
    println!("symbols:       {}", dataset.all_time_symbols.len());
    println!("with data:     {}", dataset.symbols_with_data());
    println!("trading days:  {}", dataset.timeline.len());
    let indicators: Vec<String> = dataset.indicator_types().iter().map(|i| i.to_string()).collect();
    println!("indicators:    {}", indicators.join(", "));
    for (symbol, reason) in &dataset.unavailable {
        println!("unavailable:   {symbol} ({reason})");
    }

    if dataset.symbols_with_data() == 0 {
        return fail(&PitraderError::NoPriceData {
            date: bt_config.start_date,
        });
    }
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let RunConfig {
        data,
        backtest: bt,
        strategy,
        universe_id: universe,
    } = match validate_run_config(&adapter) {
        Ok(v) => v,
        Err(e) => return fail(&e),
    };

    eprintln!("\nData:");
    eprintln!("  source:     {}", data.source);
    eprintln!("  workers:    {}", data.workers);
    eprintln!("  warm-up:    {} bars", data.warmup_bars);
    for dir in &data.fallback_dirs {
        eprintln!("  fallback:   {}", dir.display());
    }

    eprintln!("\nBacktest:");
    eprintln!("  universe:   {universe}");
    eprintln!("  window:     {} to {}", bt.start_date, bt.end_date);
    eprintln!("  capital:    {:.2}", bt.initial_capital);
    eprintln!("  turnover:   {:.1} bps", bt.turnover_cost_per_unit * 10_000.0);

    eprintln!("\nStrategy: {}", strategy.name);
    for (indicator, weight) in &strategy.indicator_weights {
        eprintln!("  {indicator}: {weight}");
    }
    eprintln!("  allocation: {}", strategy.allocation_method);
    eprintln!("  rebalance:  {}", strategy.rebalancing_frequency);
    eprintln!("  max weight: {:.2}", strategy.constraints.max_single_allocation);

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_universe(config_path: &Path, date: NaiveDate) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let data_config = match validate_data_config(&adapter) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };
    let universe = match universe_id(&adapter) {
        Ok(u) => u,
        Err(e) => return fail(&e),
    };
    let ports = match open_ports(&data_config) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let timeline = match ports.universe.get_timeline(&universe) {
        Ok(t) => t,
        Err(e) => return fail(&e),
    };

    let Some(snapshot) = timeline.snapshot_as_of(date) else {
        return fail(&PitraderError::NoActiveSymbols { date });
    };

    eprintln!(
        "{} as of {}: snapshot {} ({} members)",
        universe,
        date,
        snapshot.date,
        snapshot.count()
    );
    for symbol in &snapshot.member_symbols {
        match timeline.first_membership(symbol) {
            Some(since) => println!("{symbol}\t{since}"),
            None => println!("{symbol}"),
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_config(source: DataSource) -> DataConfig {
        DataConfig {
            source,
            price_dir: Some(PathBuf::from("/tmp/prices")),
            universe_dir: Some(PathBuf::from("/tmp/universes")),
            fallback_dirs: Vec::new(),
            sqlite_path: None,
            pool_size: 1,
            workers: 1,
            warmup_bars: 10,
        }
    }

    #[test]
    fn csv_ports() {
        let ports = open_ports(&data_config(DataSource::Csv)).unwrap();
        assert_eq!(ports.data.name(), "csv:/tmp/prices");
    }

    #[test]
    fn fallback_dirs_build_chain() {
        let mut config = data_config(DataSource::Csv);
        config.fallback_dirs = vec![PathBuf::from("/tmp/backup")];
        let ports = open_ports(&config).unwrap();
        assert_eq!(ports.data.name(), "csv:/tmp/prices > csv:/tmp/backup");
    }

    #[test]
    fn sqlite_without_path_is_config_error() {
        let err = open_ports(&data_config(DataSource::Sqlite)).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn parses_universe_command() {
        let cli = Cli::try_parse_from([
            "pitrader", "universe", "-c", "config.ini", "--date", "2020-07-01",
        ])
        .unwrap();
        match cli.command {
            Command::Universe { config, date } => {
                assert_eq!(config, PathBuf::from("config.ini"));
                assert_eq!(date, NaiveDate::from_ymd_opt(2020, 7, 1).unwrap());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_date() {
        assert!(
            Cli::try_parse_from(["pitrader", "universe", "-c", "x.ini", "--date", "July"]).is_err()
        );
    }

    #[test]
    fn parses_backtest_outputs() {
        let cli = Cli::try_parse_from([
            "pitrader", "backtest", "-c", "c.ini", "-o", "r.json", "--csv", "p.csv",
        ])
        .unwrap();
        match cli.command {
            Command::Backtest { output, csv, .. } => {
                assert_eq!(output, Some(PathBuf::from("r.json")));
                assert_eq!(csv, Some(PathBuf::from("p.csv")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
