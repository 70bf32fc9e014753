use chrono::{DateTime, Duration, Utc};

use crate::models::{Roll, RollId};

/// Trailing window `[now - window_days, now]`, inclusive at both ends.
///
/// A window reaching past the earliest representable instant starts there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RollWindow {
    pub fn trailing(window_days: u32, now: DateTime<Utc>) -> Self {
        let start = now
            .checked_sub_signed(Duration::days(i64::from(window_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end: now }
    }

    /// Lower bound for storage queries; `None` when the window is unbounded below.
    pub fn lower_bound(&self) -> Option<DateTime<Utc>> {
        (self.start != DateTime::<Utc>::MIN_UTC).then_some(self.start)
    }

    /// Rolls that were never completed fall outside every window.
    pub fn contains(&self, completed_at: Option<DateTime<Utc>>) -> bool {
        match completed_at {
            Some(at) => at >= self.start && at <= self.end,
            None => false,
        }
    }
}

/// In-memory form of the window query `PgStore::completed_rolls` runs in SQL.
pub fn select_rolls<'a>(rolls: impl IntoIterator<Item = &'a Roll>, window: &RollWindow) -> Vec<RollId> {
    rolls
        .into_iter()
        .filter(|roll| window.contains(roll.completed_at))
        .map(|roll| roll.id)
        .collect()
}
