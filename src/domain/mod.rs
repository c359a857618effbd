//! Core domain types and logic.

pub mod ohlcv;
pub mod symbol_data;
pub mod universe;
pub mod indicator;
pub mod indicator_engine;
pub mod dataset;
pub mod temporal_filter;
pub mod signal;
pub mod allocation;
pub mod strategy;
pub mod backtest;
pub mod attribution;
pub mod metrics;
pub mod config_validation;
pub mod error;
