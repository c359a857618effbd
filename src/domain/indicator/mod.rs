//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorPoint`: A single point in an indicator time series; `None`
//!   marks a date with too little history for the indicator to be defined
//! - `IndicatorValue`: Enum for different indicator output shapes
//! - `IndicatorType`: Enum for indicator identity + parameters (serves as map key)
//! - `IndicatorSeries`: A time series of indicator values aligned with prices

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod momentum;
pub mod rsi;
pub mod sma;

pub use bollinger::calculate_bollinger;
pub use ema::calculate_ema;
pub use macd::calculate_macd;
pub use momentum::calculate_momentum;
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;

use crate::domain::ohlcv::PricePoint;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub date: NaiveDate,
    pub value: Option<IndicatorValue>,
}

impl IndicatorPoint {
    pub fn undefined(date: NaiveDate) -> Self {
        Self { date, value: None }
    }

    pub fn simple(date: NaiveDate, value: f64) -> Self {
        Self {
            date,
            value: Some(IndicatorValue::Simple(value)),
        }
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
        percent_b: f64,
    },
}

impl IndicatorValue {
    /// The single float carried into a temporal slice.
    pub fn scalar(&self) -> f64 {
        match *self {
            IndicatorValue::Simple(v) => v,
            IndicatorValue::Macd { histogram, .. } => histogram,
            IndicatorValue::Bollinger { percent_b, .. } => percent_b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Momentum(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

impl IndicatorType {
    /// Number of leading bars for which the indicator is undefined.
    pub fn lookback(&self) -> usize {
        match *self {
            IndicatorType::Sma(n) | IndicatorType::Ema(n) => n.saturating_sub(1),
            IndicatorType::Rsi(n) | IndicatorType::Momentum(n) => n,
            IndicatorType::Macd { slow, signal, .. } => {
                slow.saturating_sub(1) + signal.saturating_sub(1)
            }
            IndicatorType::Bollinger { period, .. } => period.saturating_sub(1),
        }
    }

    pub fn calculate(&self, points: &[PricePoint]) -> IndicatorSeries {
        match *self {
            IndicatorType::Sma(n) => calculate_sma(points, n),
            IndicatorType::Ema(n) => calculate_ema(points, n),
            IndicatorType::Rsi(n) => calculate_rsi(points, n),
            IndicatorType::Momentum(n) => calculate_momentum(points, n),
            IndicatorType::Macd { fast, slow, signal } => calculate_macd(points, fast, slow, signal),
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => calculate_bollinger(points, period, stddev_mult_x100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn empty(indicator_type: IndicatorType) -> Self {
        Self {
            indicator_type,
            values: Vec::new(),
        }
    }

    /// Value on exactly `date`, if defined.
    pub fn value_on(&self, date: NaiveDate) -> Option<IndicatorValue> {
        self.values
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .and_then(|i| self.values[i].value)
    }

    pub fn defined_count(&self) -> usize {
        self.values.iter().filter(|p| p.is_defined()).count()
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Momentum(period) => write!(f, "MOMENTUM({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid indicator '{input}': {reason}")]
pub struct IndicatorParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for IndicatorType {
    type Err = IndicatorParseError;

    /// Parses the display form, e.g. `RSI(14)`, `MACD(12,26,9)`, `MACD`,
    /// `BOLLINGER(20,2)`. `ROC(n)` is accepted as an alias of `MOMENTUM(n)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| IndicatorParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let text = s.trim().to_uppercase();
        let (name, args) = match text.find('(') {
            Some(open) => {
                let close = text.rfind(')').ok_or_else(|| err("missing ')'"))?;
                if close != text.len() - 1 || close < open {
                    return Err(err("unexpected text after ')'"));
                }
                let args: Vec<&str> = text[open + 1..close].split(',').map(str::trim).collect();
                (text[..open].trim().to_string(), args)
            }
            None => (text.clone(), Vec::new()),
        };

        let period = |raw: &str| -> Result<usize, IndicatorParseError> {
            match raw.parse::<usize>() {
                Ok(0) => Err(err("period must be positive")),
                Ok(n) => Ok(n),
                Err(_) => Err(err("period must be an integer")),
            }
        };

        match (name.as_str(), args.as_slice()) {
            ("SMA", [n]) => Ok(IndicatorType::Sma(period(n)?)),
            ("EMA", [n]) => Ok(IndicatorType::Ema(period(n)?)),
            ("RSI", [n]) => Ok(IndicatorType::Rsi(period(n)?)),
            ("RSI", []) => Ok(IndicatorType::Rsi(rsi::DEFAULT_PERIOD)),
            ("MOMENTUM" | "ROC", [n]) => Ok(IndicatorType::Momentum(period(n)?)),
            ("MACD", []) => Ok(IndicatorType::Macd {
                fast: macd::DEFAULT_FAST,
                slow: macd::DEFAULT_SLOW,
                signal: macd::DEFAULT_SIGNAL,
            }),
            ("MACD", [fast, slow, signal]) => {
                let (fast, slow, signal) = (period(fast)?, period(slow)?, period(signal)?);
                if fast >= slow {
                    return Err(err("fast period must be shorter than slow period"));
                }
                Ok(IndicatorType::Macd { fast, slow, signal })
            }
            ("BOLLINGER", [n, mult]) => {
                let mult: f64 = mult
                    .parse()
                    .map_err(|_| err("multiplier must be a number"))?;
                if mult <= 0.0 || !mult.is_finite() {
                    return Err(err("multiplier must be positive"));
                }
                Ok(IndicatorType::Bollinger {
                    period: period(n)?,
                    stddev_mult_x100: (mult * 100.0).round() as u32,
                })
            }
            ("SMA" | "EMA" | "MOMENTUM" | "ROC" | "MACD" | "BOLLINGER" | "RSI", _) => {
                Err(err("wrong number of parameters"))
            }
            _ => Err(err("unknown indicator")),
        }
    }
}
