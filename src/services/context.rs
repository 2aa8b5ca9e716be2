//! Per-cycle context passed to every service call.

use chrono::{DateTime, Utc};

use crate::config::PollerSettings;
use crate::storage::Database;

/// Everything a service needs for one poll cycle.
///
/// Created once per cycle. `now` is fixed for the whole cycle so recency
/// windows and scheduled follow-ups are consistent across inboxes.
#[derive(Debug, Clone, Copy)]
pub struct PollContext<'a> {
    pub db: &'a Database,
    pub settings: &'a PollerSettings,
    pub now: DateTime<Utc>,
}

impl<'a> PollContext<'a> {
    pub fn new(db: &'a Database, settings: &'a PollerSettings, now: DateTime<Utc>) -> Self {
        Self { db, settings, now }
    }

    /// How far back an order may have been placed and still be correlated.
    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.settings.correlation.recency_days.max(0))
    }
}
