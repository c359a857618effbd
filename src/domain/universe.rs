//! Point-in-time universe membership.
//!
//! A universe is an ordered list of snapshots. The membership valid on a date
//! is the one from the most recent snapshot at or before it; the interval
//! between two consecutive snapshots is a holding period.

use crate::domain::error::PitraderError;
use crate::domain::ohlcv::Symbol;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    pub date: NaiveDate,
    pub member_symbols: BTreeSet<Symbol>,
}

impl UniverseSnapshot {
    pub fn new<I, S>(date: NaiveDate, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Self {
            date,
            member_symbols: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.member_symbols.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseTimeline {
    pub universe_id: String,
    snapshots: Vec<UniverseSnapshot>,
}

impl UniverseTimeline {
    /// Builds a timeline, rejecting snapshots whose dates are not strictly
    /// increasing.
    pub fn new(
        universe_id: impl Into<String>,
        snapshots: Vec<UniverseSnapshot>,
    ) -> Result<Self, PitraderError> {
        let universe_id = universe_id.into();
        for pair in snapshots.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(PitraderError::InvalidTimeline {
                    universe_id,
                    reason: format!(
                        "snapshot dates must be strictly increasing ({} then {})",
                        pair[0].date, pair[1].date
                    ),
                });
            }
        }
        Ok(Self {
            universe_id,
            snapshots,
        })
    }

    /// Groups `(date, symbol)` membership rows into snapshots.
    pub fn from_memberships<I>(universe_id: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, Symbol)>,
    {
        let mut grouped: BTreeMap<NaiveDate, BTreeSet<Symbol>> = BTreeMap::new();
        for (date, symbol) in rows {
            grouped.entry(date).or_default().insert(symbol);
        }
        Self {
            universe_id: universe_id.into(),
            snapshots: grouped
                .into_iter()
                .map(|(date, member_symbols)| UniverseSnapshot {
                    date,
                    member_symbols,
                })
                .collect(),
        }
    }

    pub fn snapshots(&self) -> &[UniverseSnapshot] {
        &self.snapshots
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.snapshots.first().map(|s| s.date)
    }

    /// The most recent snapshot dated on or before `date`.
    pub fn snapshot_as_of(&self, date: NaiveDate) -> Option<&UniverseSnapshot> {
        let idx = self.snapshots.partition_point(|s| s.date <= date);
        if idx == 0 {
            None
        } else {
            Some(&self.snapshots[idx - 1])
        }
    }

    /// Union of every snapshot's members over the whole timeline.
    pub fn all_time_symbols(&self) -> BTreeSet<Symbol> {
        self.snapshots
            .iter()
            .flat_map(|s| s.member_symbols.iter().cloned())
            .collect()
    }

    /// Snapshot dates strictly after `start` and on or before `end`.
    pub fn snapshot_dates_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        self.snapshots
            .iter()
            .map(|s| s.date)
            .filter(|d| *d > start && *d <= end)
            .collect()
    }

    /// Date of the first snapshot that lists `symbol`.
    pub fn first_membership(&self, symbol: &str) -> Option<NaiveDate> {
        self.snapshots
            .iter()
            .find(|s| s.member_symbols.contains(symbol))
            .map(|s| s.date)
    }
}
