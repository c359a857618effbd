//! End-to-end tests of the backtest pipeline.
//!
//! Tests cover:
//! - Universe changes mid-run: turnover cost only where membership changes
//! - No holding outside the snapshot active on its date
//! - Deterministic results across runs and worker counts
//! - Failed runs keep the periods booked before the failure
//! - Undefined indicators drop a symbol from the signal set
//! - Dataset cache reuse and cancel/resume of a build
//! - Provider fallback chains
//! - CSV and SQLite adapters driving a full run, and the report writers

mod common;

use approx::assert_relative_eq;
use common::*;
use pitrader::adapters::csv_adapter::CsvAdapter;
use pitrader::adapters::csv_report_adapter::CsvReportAdapter;
use pitrader::adapters::csv_universe_adapter::CsvUniverseAdapter;
use pitrader::adapters::fallback_adapter::FallbackDataPort;
use pitrader::adapters::json_report_adapter::JsonReportAdapter;
use pitrader::domain::allocation::AllocationMethod;
use pitrader::domain::backtest::{BacktestResult, RunStatus, run_backtest};
use pitrader::domain::dataset::{
    BuildOptions, CancelFlag, DatasetBuilder, DatasetCache, build_complete_dataset,
};
use pitrader::domain::error::PitraderError;
use pitrader::domain::indicator::IndicatorType;
use pitrader::domain::strategy::{RebalanceFrequency, StrategyConfig};
use pitrader::domain::{signal, temporal_filter};
use pitrader::ports::data_port::DataPort;
use pitrader::ports::report_port::ReportPort;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const UNIVERSE: &str = "TEST";

fn two_regime_universe() -> MockUniversePort {
    MockUniversePort::new().with_snapshots(
        UNIVERSE,
        &[
            (date(2020, 1, 1), vec!["AAA", "BBB"]),
            (date(2020, 7, 1), vec!["BBB", "CCC"]),
        ],
    )
}

fn three_symbol_prices() -> MockDataPort {
    MockDataPort::new()
        .with_points("AAA", full_history("AAA", 50.0, 0.05))
        .with_points("BBB", full_history("BBB", 80.0, 0.10))
        .with_points("CCC", full_history("CCC", 30.0, 0.02))
}

fn run(
    universe: &MockUniversePort,
    data: &dyn DataPort,
    strategy: &StrategyConfig,
) -> Result<BacktestResult, PitraderError> {
    run_backtest(
        universe,
        data,
        UNIVERSE,
        strategy,
        &sample_config(),
        &BuildOptions::default(),
        &DatasetCache::new(),
        &CancelFlag::new(),
    )
}

mod universe_changes {
    use super::*;

    #[test]
    fn turnover_cost_only_when_membership_changes() {
        let universe = two_regime_universe();
        let data = three_symbol_prices();
        let strategy = momentum_strategy(RebalanceFrequency::Quarterly);

        let result = run(&universe, &data, &strategy).unwrap();
        assert!(result.status.is_completed());

        let dates: Vec<_> = result.periods.iter().map(|p| p.period_date).collect();
        assert_eq!(dates.first(), Some(&date(2020, 1, 1)));
        assert_eq!(dates.last(), Some(&date(2020, 12, 31)));
        assert!(dates.contains(&date(2020, 7, 1)));

        for p in &result.periods {
            if p.period_date == date(2020, 7, 1) {
                assert_relative_eq!(p.turnover_rate, 2.0 / 3.0, epsilon = 1e-12);
                assert_relative_eq!(p.universe_turnover_cost, 2.0 / 3.0 * 0.001, epsilon = 1e-12);
            } else {
                assert_eq!(p.turnover_rate, 0.0, "unexpected turnover on {}", p.period_date);
                assert_eq!(p.universe_turnover_cost, 0.0);
            }
        }

        assert_relative_eq!(
            result.summary.total_turnover_cost,
            2.0 / 3.0 * 0.001,
            epsilon = 1e-12
        );
    }

    #[test]
    fn holdings_stay_inside_the_active_snapshot() {
        let universe = two_regime_universe();
        let data = three_symbol_prices();
        let strategy = momentum_strategy(RebalanceFrequency::Monthly);

        let result = run(&universe, &data, &strategy).unwrap();
        for p in &result.periods {
            for symbol in p.weights.keys() {
                assert!(
                    p.active_symbols.contains(symbol),
                    "{} held on {} outside {:?}",
                    symbol,
                    p.period_date,
                    p.active_symbols
                );
            }
            if p.period_date < date(2020, 7, 1) {
                assert!(!p.weights.contains_key("CCC"));
            } else {
                assert!(!p.weights.contains_key("AAA"));
            }
        }
    }

    #[test]
    fn first_period_realizes_nothing() {
        let result = run(
            &two_regime_universe(),
            &three_symbol_prices(),
            &momentum_strategy(RebalanceFrequency::Monthly),
        )
        .unwrap();

        let first = &result.periods[0];
        assert_eq!(first.gross_strategy_return, 0.0);
        assert_eq!(first.net_return, 0.0);
        assert_relative_eq!(first.portfolio_value, 100_000.0);
    }

    #[test]
    fn portfolio_value_compounds_net_returns() {
        let result = run(
            &two_regime_universe(),
            &three_symbol_prices(),
            &momentum_strategy(RebalanceFrequency::Monthly),
        )
        .unwrap();

        let mut value = 100_000.0;
        for p in &result.periods {
            let net = p.gross_strategy_return - p.universe_turnover_cost;
            assert_relative_eq!(p.net_return, net, epsilon = 1e-12);
            value *= 1.0 + net;
            assert_relative_eq!(p.portfolio_value, value, max_relative = 1e-12);
        }
        assert_relative_eq!(result.summary.final_value, value, max_relative = 1e-12);
        // steady uptrends in every held symbol
        assert!(result.summary.total_return > 0.0);
    }

    #[test]
    fn weights_are_fully_invested_and_capped() {
        let mut strategy = sample_strategy(
            &[(IndicatorType::Momentum(20), 1.0)],
            AllocationMethod::RiskParity,
            RebalanceFrequency::Monthly,
        );
        strategy.constraints.max_single_allocation = 0.6;

        let result = run(&two_regime_universe(), &three_symbol_prices(), &strategy).unwrap();
        for p in &result.periods {
            if p.weights.is_empty() {
                continue;
            }
            let total: f64 = p.weights.values().sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-9);
            for w in p.weights.values() {
                assert!(*w >= 0.0);
                assert!(*w <= 0.6 + 1e-9, "weight {} above cap on {}", w, p.period_date);
            }
        }
    }
}

mod determinism {
    use super::*;

    #[test]
    fn repeated_runs_serialize_identically() {
        let universe = two_regime_universe();
        let strategy = sample_strategy(
            &[(IndicatorType::Momentum(20), 0.5), (IndicatorType::Rsi(14), 0.5)],
            AllocationMethod::InverseVolatility,
            RebalanceFrequency::Monthly,
        );

        let first = run(&universe, &three_symbol_prices(), &strategy).unwrap();
        let second = run(&universe, &three_symbol_prices(), &strategy).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            JsonReportAdapter::render(&first).unwrap(),
            JsonReportAdapter::render(&second).unwrap()
        );
    }

    #[test]
    fn worker_count_does_not_change_results() {
        let universe = two_regime_universe();
        let strategy = momentum_strategy(RebalanceFrequency::Monthly);
        let cancel = CancelFlag::new();

        let results: Vec<BacktestResult> = [1, 8]
            .into_iter()
            .map(|workers| {
                run_backtest(
                    &universe,
                    &three_symbol_prices(),
                    UNIVERSE,
                    &strategy,
                    &sample_config(),
                    &BuildOptions {
                        workers,
                        ..BuildOptions::default()
                    },
                    &DatasetCache::new(),
                    &cancel,
                )
                .unwrap()
            })
            .collect();

        assert_eq!(results[0], results[1]);
    }
}

mod failure_states {
    use super::*;

    #[test]
    fn unpriced_snapshot_fails_the_run_at_that_date() {
        let universe = MockUniversePort::new().with_snapshots(
            UNIVERSE,
            &[
                (date(2020, 1, 1), vec!["AAA"]),
                (date(2020, 7, 1), vec!["ZZZ"]),
            ],
        );
        let data = MockDataPort::new().with_points("AAA", full_history("AAA", 50.0, 0.05));

        let result = run(&universe, &data, &momentum_strategy(RebalanceFrequency::Monthly)).unwrap();

        match &result.status {
            RunStatus::Failed { date: failed_on, reason } => {
                assert_eq!(*failed_on, date(2020, 7, 1));
                assert!(reason.contains("2020-07-01"), "reason: {}", reason);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!result.periods.is_empty());
        assert!(result.periods.iter().all(|p| p.period_date < date(2020, 7, 1)));
        assert_eq!(result.summary.period_count, result.periods.len());
    }

    #[test]
    fn unknown_universe_is_a_configuration_error() {
        let err = run_backtest(
            &two_regime_universe(),
            &three_symbol_prices(),
            "NOPE",
            &momentum_strategy(RebalanceFrequency::Monthly),
            &sample_config(),
            &BuildOptions::default(),
            &DatasetCache::new(),
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PitraderError::UnknownUniverse { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn invalid_strategy_is_rejected_before_fetching() {
        let data = three_symbol_prices();
        let mut strategy = momentum_strategy(RebalanceFrequency::Monthly);
        strategy.indicator_weights.clear();

        let err = run(&two_regime_universe(), &data, &strategy).unwrap_err();
        assert!(matches!(err, PitraderError::ConfigInvalid { .. }));
        assert_eq!(data.calls(), 0);

        let mut strategy = momentum_strategy(RebalanceFrequency::Monthly);
        strategy.constraints.max_single_allocation = 0.0;
        let err = run(&two_regime_universe(), &data, &strategy).unwrap_err();
        assert!(matches!(err, PitraderError::ConfigInvalid { .. }));
        assert_eq!(data.calls(), 0);
    }

    #[test]
    fn invalid_backtest_config_is_rejected() {
        let mut config = sample_config();
        config.initial_capital = -1.0;
        let err = run_backtest(
            &two_regime_universe(),
            &three_symbol_prices(),
            UNIVERSE,
            &momentum_strategy(RebalanceFrequency::Monthly),
            &config,
            &BuildOptions::default(),
            &DatasetCache::new(),
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PitraderError::ConfigInvalid { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn timeline_starting_after_the_backtest_is_rejected() {
        let universe = MockUniversePort::new()
            .with_snapshots(UNIVERSE, &[(date(2020, 3, 1), vec!["AAA"])]);
        let err = run(
            &universe,
            &three_symbol_prices(),
            &momentum_strategy(RebalanceFrequency::Monthly),
        )
        .unwrap_err();
        assert!(matches!(err, PitraderError::InvalidTimeline { .. }));
    }

    #[test]
    fn symbol_without_data_is_recorded_not_fatal() {
        let universe = MockUniversePort::new()
            .with_snapshots(UNIVERSE, &[(date(2020, 1, 1), vec!["AAA", "GONE"])]);
        let data = MockDataPort::new().with_points("AAA", full_history("AAA", 50.0, 0.05));

        let dataset = build_complete_dataset(
            &universe,
            &data,
            UNIVERSE,
            date(2020, 1, 1),
            date(2020, 12, 31),
            &BuildOptions::default(),
            &CancelFlag::new(),
        )
        .unwrap();

        assert_eq!(dataset.symbols_with_data(), 1);
        assert!(dataset.unavailable.contains_key("GONE"));
        assert!(dataset.all_time_symbols.contains("GONE"));
    }
}

mod undefined_indicators {
    use super::*;

    #[test]
    fn symbol_in_rsi_warmup_gets_no_signal() {
        let as_of = date(2020, 6, 5);
        let universe = MockUniversePort::new()
            .with_snapshots(UNIVERSE, &[(date(2020, 1, 1), vec!["OLD", "NEW"])]);
        let data = MockDataPort::new()
            .with_points("OLD", full_history("OLD", 50.0, 0.05))
            .with_points(
                "NEW",
                trending_series("NEW", date(2020, 6, 1), as_of, 20.0, 0.1),
            );

        let dataset = build_complete_dataset(
            &universe,
            &data,
            UNIVERSE,
            date(2020, 1, 1),
            date(2020, 12, 31),
            &BuildOptions {
                indicators: vec![IndicatorType::Rsi(14)],
                ..BuildOptions::default()
            },
            &CancelFlag::new(),
        )
        .unwrap();

        let slice = temporal_filter::slice(&dataset, as_of, 7);
        assert!(slice.prices.contains_key("NEW"));
        assert_eq!(slice.indicator("NEW", IndicatorType::Rsi(14)), None);

        let weights = [(IndicatorType::Rsi(14), 1.0)].into_iter().collect();
        let signals = signal::generate(&slice, &weights);
        assert!(signals.contains_key("OLD"));
        assert!(!signals.contains_key("NEW"));
    }

    #[test]
    fn indicator_ignores_gaps_in_membership() {
        let universe = MockUniversePort::new().with_snapshots(
            UNIVERSE,
            &[
                (date(2020, 1, 1), vec!["AAA", "BBB"]),
                (date(2020, 4, 1), vec!["BBB"]),
                (date(2020, 7, 1), vec!["AAA", "BBB"]),
            ],
        );
        let history = full_history("AAA", 50.0, 0.05);
        let data = MockDataPort::new()
            .with_points("AAA", history.clone())
            .with_points("BBB", full_history("BBB", 80.0, 0.10));

        let dataset = build_complete_dataset(
            &universe,
            &data,
            UNIVERSE,
            date(2020, 1, 1),
            date(2020, 12, 31),
            &BuildOptions {
                indicators: vec![IndicatorType::Sma(20)],
                ..BuildOptions::default()
            },
            &CancelFlag::new(),
        )
        .unwrap();

        let away = temporal_filter::slice(&dataset, date(2020, 5, 15), 7);
        assert!(!away.active_symbols.contains("AAA"));
        assert_eq!(away.indicator("AAA", IndicatorType::Sma(20)), None);

        // the window at re-entry spans the months AAA was out of the universe
        let reentry = date(2020, 7, 1);
        let back = temporal_filter::slice(&dataset, reentry, 7);
        let closes: Vec<f64> = history
            .iter()
            .filter(|p| p.date <= reentry)
            .map(|p| p.close)
            .collect();
        let expected = closes[closes.len() - 20..].iter().sum::<f64>() / 20.0;

        let value = back.indicator("AAA", IndicatorType::Sma(20)).unwrap();
        assert_relative_eq!(value, expected, epsilon = 1e-9);

        let from_full_history = IndicatorType::Sma(20)
            .calculate(dataset.symbol_data("AAA").unwrap().points())
            .values
            .iter()
            .rev()
            .find(|v| v.date <= reentry)
            .and_then(|v| v.value.as_ref().map(|x| x.scalar()))
            .unwrap();
        assert_relative_eq!(value, from_full_history, epsilon = 1e-12);
    }
}

mod dataset_reuse {
    use super::*;

    #[test]
    fn cache_returns_the_same_dataset_without_refetching() {
        let universe = two_regime_universe();
        let data = three_symbol_prices();
        let cache = DatasetCache::new();
        let cancel = CancelFlag::new();
        let options = BuildOptions {
            indicators: vec![IndicatorType::Momentum(20)],
            ..BuildOptions::default()
        };

        let build = |options: &BuildOptions| {
            cache
                .get_or_build(
                    &universe,
                    &data,
                    UNIVERSE,
                    date(2020, 1, 1),
                    date(2020, 12, 31),
                    options,
                    &cancel,
                )
                .unwrap()
        };

        let first = build(&options);
        assert_eq!(data.calls(), 3);
        let second = build(&options);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(data.calls(), 3);

        let extended = build(&BuildOptions {
            indicators: vec![IndicatorType::Momentum(20), IndicatorType::Sma(10)],
            ..BuildOptions::default()
        });
        assert!(!Arc::ptr_eq(&first, &extended));
        assert!(extended.has_indicator(IndicatorType::Sma(10)));
        assert!(extended.has_indicator(IndicatorType::Momentum(20)));
        assert_eq!(data.calls(), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn strategies_share_one_cached_dataset() {
        let universe = two_regime_universe();
        let data = three_symbol_prices();
        let cache = DatasetCache::new();
        let cancel = CancelFlag::new();

        for method in [
            AllocationMethod::EqualWeight,
            AllocationMethod::InverseVolatility,
            AllocationMethod::RiskParity,
        ] {
            let strategy = sample_strategy(
                &[(IndicatorType::Momentum(20), 1.0)],
                method,
                RebalanceFrequency::Monthly,
            );
            let result = run_backtest(
                &universe,
                &data,
                UNIVERSE,
                &strategy,
                &sample_config(),
                &BuildOptions::default(),
                &cache,
                &cancel,
            )
            .unwrap();
            assert!(result.status.is_completed());
        }
        assert_eq!(data.calls(), 3);
    }

    #[test]
    fn long_lookback_after_short_warmup_refetches_history() {
        let universe = two_regime_universe();
        let data = three_symbol_prices();
        let cache = DatasetCache::new();
        let cancel = CancelFlag::new();

        let mut short = sample_strategy(
            &[(IndicatorType::Sma(2), 1.0)],
            AllocationMethod::EqualWeight,
            RebalanceFrequency::Monthly,
        );
        short.constraints.covariance_window = 3;
        short.constraints.min_history = 2;
        run_backtest(
            &universe,
            &data,
            UNIVERSE,
            &short,
            &sample_config(),
            &BuildOptions {
                warmup_bars: 5,
                ..BuildOptions::default()
            },
            &cache,
            &cancel,
        )
        .unwrap();

        let long = sample_strategy(
            &[(IndicatorType::Sma(200), 1.0)],
            AllocationMethod::EqualWeight,
            RebalanceFrequency::Monthly,
        );
        let shared = run_backtest(
            &universe,
            &data,
            UNIVERSE,
            &long,
            &sample_config(),
            &BuildOptions::default(),
            &cache,
            &cancel,
        )
        .unwrap();
        let fresh = run(&universe, &three_symbol_prices(), &long).unwrap();

        assert_eq!(shared, fresh);
        assert!(!shared.periods[0].weights.is_empty());
        assert_eq!(data.calls(), 6);
        assert_eq!(cache.len(), 1);
    }

    /// Cancels the build on the first fetch it serves.
    struct CancellingPort {
        inner: MockDataPort,
        cancel: CancelFlag,
        armed: AtomicBool,
    }

    impl DataPort for CancellingPort {
        fn fetch_prices(
            &self,
            symbol: &str,
            start_date: chrono::NaiveDate,
            end_date: chrono::NaiveDate,
        ) -> Result<Vec<PricePoint>, PitraderError> {
            let result = self.inner.fetch_prices(symbol, start_date, end_date);
            if self.armed.swap(false, Ordering::SeqCst) {
                self.cancel.cancel();
            }
            result
        }

        fn name(&self) -> &str {
            "cancelling"
        }
    }

    #[test]
    fn cancelled_build_resumes_without_refetching() {
        let universe = two_regime_universe();
        let cancel = CancelFlag::new();
        let port = CancellingPort {
            inner: three_symbol_prices(),
            cancel: cancel.clone(),
            armed: AtomicBool::new(true),
        };
        let builder = DatasetBuilder::new(
            &universe,
            &port,
            BuildOptions {
                workers: 1,
                ..BuildOptions::default()
            },
        );

        let err = builder
            .build(UNIVERSE, date(2020, 1, 1), date(2020, 12, 31), &cancel)
            .unwrap_err();
        match err {
            PitraderError::Cancelled { fetched, remaining } => {
                assert_eq!(fetched, 1);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(builder.fetched_count(), 1);

        cancel.reset();
        let dataset = builder
            .build(UNIVERSE, date(2020, 1, 1), date(2020, 12, 31), &cancel)
            .unwrap();
        assert_eq!(dataset.symbols_with_data(), 3);
        assert_eq!(port.inner.calls(), 3);
    }

    #[test]
    fn transient_failures_are_retried() {
        let universe = two_regime_universe();
        let data = three_symbol_prices().with_error("CCC", "connection reset");
        let builder = DatasetBuilder::new(&universe, &data, BuildOptions::default());
        let cancel = CancelFlag::new();

        let dataset = builder
            .build(UNIVERSE, date(2020, 1, 1), date(2020, 12, 31), &cancel)
            .unwrap();
        assert!(dataset.unavailable["CCC"].contains("connection reset"));
        assert_eq!(data.calls(), 3);

        builder
            .build(UNIVERSE, date(2020, 1, 1), date(2020, 12, 31), &cancel)
            .unwrap();
        assert_eq!(data.calls(), 4);
    }
}

mod provider_fallback {
    use super::*;

    #[test]
    fn missing_symbols_come_from_the_next_provider() {
        let universe = two_regime_universe();
        let primary = MockDataPort::new()
            .with_points("AAA", full_history("AAA", 50.0, 0.05))
            .with_points("BBB", full_history("BBB", 80.0, 0.10));
        let backup = MockDataPort::new().with_points("CCC", full_history("CCC", 30.0, 0.02));
        let chain = FallbackDataPort::new(vec![Box::new(primary), Box::new(backup)]);
        assert_eq!(chain.name(), "mock > mock");

        let dataset = build_complete_dataset(
            &universe,
            &chain,
            UNIVERSE,
            date(2020, 1, 1),
            date(2020, 12, 31),
            &BuildOptions::default(),
            &CancelFlag::new(),
        )
        .unwrap();

        assert!(dataset.unavailable.is_empty());
        assert_eq!(dataset.symbols_with_data(), 3);
    }
}

fn write_price_csv(dir: &Path, symbol: &str, points: &[PricePoint]) {
    let mut file = std::fs::File::create(dir.join(format!("{}.csv", symbol))).unwrap();
    writeln!(file, "date,open,high,low,close,volume").unwrap();
    for p in points {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            p.date, p.open, p.high, p.low, p.close, p.volume
        )
        .unwrap();
    }
}

fn write_universe_csv(dir: &Path, universe_id: &str, rows: &[(&str, &str)]) {
    let mut file = std::fs::File::create(dir.join(format!("{}.csv", universe_id))).unwrap();
    writeln!(file, "date,symbol").unwrap();
    for (d, symbol) in rows {
        writeln!(file, "{},{}", d, symbol).unwrap();
    }
}

const TWO_REGIME_ROWS: &[(&str, &str)] = &[
    ("2020-01-01", "AAA"),
    ("2020-01-01", "BBB"),
    ("2020-07-01", "BBB"),
    ("2020-07-01", "CCC"),
];

mod csv_pipeline {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn csv_directories_match_in_memory_run() {
        let prices = TempDir::new().unwrap();
        let universes = TempDir::new().unwrap();
        for (symbol, start, drift) in [("AAA", 50.0, 0.05), ("BBB", 80.0, 0.10), ("CCC", 30.0, 0.02)] {
            write_price_csv(prices.path(), symbol, &full_history(symbol, start, drift));
        }
        write_universe_csv(universes.path(), UNIVERSE, TWO_REGIME_ROWS);

        let strategy = momentum_strategy(RebalanceFrequency::Monthly);
        let from_csv = run_backtest(
            &CsvUniverseAdapter::new(universes.path().to_path_buf()),
            &CsvAdapter::new(prices.path().to_path_buf()),
            UNIVERSE,
            &strategy,
            &sample_config(),
            &BuildOptions::default(),
            &DatasetCache::new(),
            &CancelFlag::new(),
        )
        .unwrap();
        let in_memory = run(&two_regime_universe(), &three_symbol_prices(), &strategy).unwrap();

        assert_eq!(from_csv, in_memory);
    }

    #[test]
    fn reports_are_written() {
        let result = run(
            &two_regime_universe(),
            &three_symbol_prices(),
            &momentum_strategy(RebalanceFrequency::Quarterly),
        )
        .unwrap();
        let out = TempDir::new().unwrap();

        let json_path = out.path().join("result.json");
        JsonReportAdapter::new().write(&result, &json_path).unwrap();
        let parsed: BacktestResult =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed, result);

        let csv_path = out.path().join("periods.csv");
        CsvReportAdapter::new().write(&result, &csv_path).unwrap();
        let rows = csv::Reader::from_path(&csv_path).unwrap().records().count();
        assert_eq!(rows, result.periods.len());
    }
}

#[cfg(feature = "sqlite")]
mod sqlite_pipeline {
    use super::*;
    use pitrader::adapters::sqlite_adapter::SqliteAdapter;

    fn seeded() -> SqliteAdapter {
        let db = SqliteAdapter::in_memory().unwrap();
        db.initialize_schema().unwrap();
        for (symbol, start, drift) in [("AAA", 50.0, 0.05), ("BBB", 80.0, 0.10), ("CCC", 30.0, 0.02)] {
            db.insert_prices(&full_history(symbol, start, drift)).unwrap();
        }
        db.insert_snapshot(UNIVERSE, date(2020, 1, 1), &["AAA".into(), "BBB".into()])
            .unwrap();
        db.insert_snapshot(UNIVERSE, date(2020, 7, 1), &["BBB".into(), "CCC".into()])
            .unwrap();
        db
    }

    #[test]
    fn sqlite_backed_run_matches_in_memory_run() {
        let db = seeded();
        let strategy = momentum_strategy(RebalanceFrequency::Monthly);

        let from_db = run_backtest(
            &db,
            &db,
            UNIVERSE,
            &strategy,
            &sample_config(),
            &BuildOptions {
                workers: 1,
                ..BuildOptions::default()
            },
            &DatasetCache::new(),
            &CancelFlag::new(),
        )
        .unwrap();
        let in_memory = run(&two_regime_universe(), &three_symbol_prices(), &strategy).unwrap();

        assert_eq!(from_db, in_memory);
    }

    #[test]
    fn sqlite_snapshot_lookup() {
        use pitrader::ports::universe_port::UniverseTimelinePort;

        let db = seeded();
        let snapshot = db
            .get_snapshot_as_of(UNIVERSE, date(2020, 8, 15))
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.date, date(2020, 7, 1));
        assert!(snapshot.member_symbols.contains("CCC"));
        assert!(db.get_snapshot_as_of(UNIVERSE, date(2019, 6, 1)).unwrap().is_none());
    }
}
