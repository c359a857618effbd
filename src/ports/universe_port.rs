//! Universe timeline store port.

use crate::domain::error::PitraderError;
use crate::domain::universe::{UniverseSnapshot, UniverseTimeline};
use chrono::NaiveDate;

pub trait UniverseTimelinePort: Send + Sync {
    /// Full ordered timeline; `UnknownUniverse` if the id does not exist.
    fn get_timeline(&self, universe_id: &str) -> Result<UniverseTimeline, PitraderError>;

    fn get_snapshot_as_of(
        &self,
        universe_id: &str,
        date: NaiveDate,
    ) -> Result<Option<UniverseSnapshot>, PitraderError> {
        let timeline = self.get_timeline(universe_id)?;
        Ok(timeline.snapshot_as_of(date).cloned())
    }
}

impl<T: UniverseTimelinePort + ?Sized> UniverseTimelinePort for std::sync::Arc<T> {
    fn get_timeline(&self, universe_id: &str) -> Result<UniverseTimeline, PitraderError> {
        (**self).get_timeline(universe_id)
    }
}
