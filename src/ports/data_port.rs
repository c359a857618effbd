//! Market data access port.

use crate::domain::error::PitraderError;
use crate::domain::ohlcv::{PricePoint, Symbol};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// A source of daily OHLCV history.
///
/// Failures are reported per symbol: a provider that cannot serve one symbol
/// returns `DataUnavailable` (or `ProviderFailure` for transport problems) for
/// that symbol only.
pub trait DataPort: Send + Sync {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, PitraderError>;

    /// Batch form; the default fetches each symbol independently.
    fn get_historical_prices(
        &self,
        symbols: &[Symbol],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> BTreeMap<Symbol, Result<Vec<PricePoint>, PitraderError>> {
        symbols
            .iter()
            .map(|s| (s.clone(), self.fetch_prices(s, start_date, end_date)))
            .collect()
    }

    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Version tag of the underlying data, part of the dataset cache key.
    fn provider_version(&self) -> String {
        "1".to_string()
    }
}

impl<T: DataPort + ?Sized> DataPort for std::sync::Arc<T> {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, PitraderError> {
        (**self).fetch_prices(symbol, start_date, end_date)
    }

    fn get_historical_prices(
        &self,
        symbols: &[Symbol],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> BTreeMap<Symbol, Result<Vec<PricePoint>, PitraderError>> {
        (**self).get_historical_prices(symbols, start_date, end_date)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn provider_version(&self) -> String {
        (**self).provider_version()
    }
}
