//! Ordered chain of price providers.

use crate::domain::error::PitraderError;
use crate::domain::ohlcv::PricePoint;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use tracing::{debug, warn};

/// Tries each provider in order and returns the first non-empty history.
///
/// A symbol every provider reports as unavailable is `DataUnavailable`. When
/// at least one provider failed for another reason the result is the last
/// such `ProviderFailure`, so the dataset builder retries the symbol later.
pub struct FallbackDataPort {
    providers: Vec<Box<dyn DataPort>>,
    name: String,
}

impl FallbackDataPort {
    pub fn new(providers: Vec<Box<dyn DataPort>>) -> Self {
        let name = providers
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>()
            .join(" > ");
        Self { providers, name }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl DataPort for FallbackDataPort {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, PitraderError> {
        let mut unavailable = Vec::new();
        let mut failure = None;

        for provider in &self.providers {
            match provider.fetch_prices(symbol, start_date, end_date) {
                Ok(points) if !points.is_empty() => {
                    debug!(symbol, provider = provider.name(), "served by provider");
                    return Ok(points);
                }
                Ok(_) => unavailable.push(format!("{}: no rows", provider.name())),
                Err(PitraderError::DataUnavailable { reason, .. }) => {
                    unavailable.push(format!("{}: {}", provider.name(), reason));
                }
                Err(e) => {
                    warn!(symbol, provider = provider.name(), error = %e, "provider failed, trying next");
                    failure = Some(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        Err(PitraderError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: if unavailable.is_empty() {
                "no providers configured".to_string()
            } else {
                unavailable.join("; ")
            },
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn provider_version(&self) -> String {
        self.providers
            .iter()
            .map(|p| p.provider_version())
            .collect::<Vec<_>>()
            .join("|")
    }
}
