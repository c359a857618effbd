//! Strategy configuration: which indicators drive the signal, how weights are
//! allocated and how often the portfolio is rebalanced.

use crate::domain::allocation::{AllocationConstraints, AllocationMethod};
use crate::domain::error::PitraderError;
use crate::domain::indicator::IndicatorType;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    /// Only on universe snapshot dates.
    OnUniverseChange,
}

impl RebalanceFrequency {
    /// Nominal periods per year, the annualization fallback for timelines too
    /// short to measure their own spacing.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            RebalanceFrequency::Daily => 252.0,
            RebalanceFrequency::Weekly => 52.0,
            RebalanceFrequency::Monthly => 12.0,
            RebalanceFrequency::Quarterly => 4.0,
            // snapshots are typically quarterly index reviews
            RebalanceFrequency::OnUniverseChange => 4.0,
        }
    }

    /// True when `date` is the first trading date of a new period given the
    /// previous trading date `prev`.
    pub fn starts_period(&self, prev: NaiveDate, date: NaiveDate) -> bool {
        match self {
            RebalanceFrequency::Daily => true,
            RebalanceFrequency::Weekly => prev.iso_week() != date.iso_week(),
            RebalanceFrequency::Monthly => {
                (prev.year(), prev.month()) != (date.year(), date.month())
            }
            RebalanceFrequency::Quarterly => {
                (prev.year(), prev.month0() / 3) != (date.year(), date.month0() / 3)
            }
            RebalanceFrequency::OnUniverseChange => false,
        }
    }
}

impl fmt::Display for RebalanceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RebalanceFrequency::Daily => "daily",
            RebalanceFrequency::Weekly => "weekly",
            RebalanceFrequency::Monthly => "monthly",
            RebalanceFrequency::Quarterly => "quarterly",
            RebalanceFrequency::OnUniverseChange => "universe",
        };
        f.write_str(s)
    }
}

impl FromStr for RebalanceFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(RebalanceFrequency::Daily),
            "weekly" => Ok(RebalanceFrequency::Weekly),
            "monthly" => Ok(RebalanceFrequency::Monthly),
            "quarterly" => Ok(RebalanceFrequency::Quarterly),
            "universe" | "on_universe_change" => Ok(RebalanceFrequency::OnUniverseChange),
            other => Err(format!(
                "unknown rebalance frequency '{}' (expected daily, weekly, monthly, quarterly or universe)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub name: String,
    pub indicator_weights: BTreeMap<IndicatorType, f64>,
    pub allocation_method: AllocationMethod,
    pub rebalancing_frequency: RebalanceFrequency,
    /// Symbols need a signal strictly above this to be held.
    pub entry_threshold: f64,
    pub max_positions: Option<usize>,
    pub constraints: AllocationConstraints,
}

impl StrategyConfig {
    pub fn indicators(&self) -> Vec<IndicatorType> {
        self.indicator_weights.keys().copied().collect()
    }

    /// Longest warm-up any configured indicator needs.
    pub fn max_lookback(&self) -> usize {
        self.indicator_weights
            .keys()
            .map(|i| i.lookback())
            .max()
            .unwrap_or(0)
    }

    /// Rejects configurations no run could use. Checked before any data is
    /// fetched.
    pub fn validate(&self) -> Result<(), PitraderError> {
        let invalid = |section: &str, key: &str, reason: String| {
            Err(PitraderError::config_invalid(section, key, reason))
        };

        if self.indicator_weights.is_empty() {
            return invalid("strategy", "indicators", "at least one indicator is required".into());
        }
        for (indicator, weight) in &self.indicator_weights {
            if !weight.is_finite() || *weight == 0.0 {
                return invalid(
                    "strategy",
                    "indicators",
                    format!("weight for {} must be finite and non-zero", indicator),
                );
            }
            if indicator.lookback() == 0 {
                return invalid(
                    "strategy",
                    "indicators",
                    format!("{} needs a period of at least 1", indicator),
                );
            }
        }
        if !self.entry_threshold.is_finite() {
            return invalid("strategy", "entry_threshold", "entry_threshold must be finite".into());
        }
        if self.max_positions == Some(0) {
            return invalid("strategy", "max_positions", "max_positions must be at least 1".into());
        }

        let c = &self.constraints;
        if !(c.max_single_allocation > 0.0 && c.max_single_allocation <= 1.0) {
            return invalid(
                "allocation",
                "max_single_allocation",
                format!("{} is outside (0, 1]", c.max_single_allocation),
            );
        }
        if c.covariance_window < 2 {
            return invalid("allocation", "covariance_window", "covariance_window must be at least 2".into());
        }
        if c.min_history < 2 || c.min_history > c.covariance_window {
            return invalid(
                "allocation",
                "min_history",
                format!("min_history must be between 2 and covariance_window ({})", c.covariance_window),
            );
        }
        if c.max_iterations == 0 {
            return invalid("allocation", "max_iterations", "max_iterations must be at least 1".into());
        }
        if !(c.tolerance > 0.0 && c.tolerance < 1.0) {
            return invalid("allocation", "tolerance", format!("{} is outside (0, 1)", c.tolerance));
        }
        Ok(())
    }
}
