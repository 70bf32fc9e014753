use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::models::{AttendanceRecord, AttendanceState, IncidentCounts, RollId, StudentId};
use crate::store::AttendanceSource;

/// Counts, per student, the records on `rolls` whose state is watched.
///
/// In-memory form of the `GROUP BY` that `PgStore::incident_counts` runs.
pub fn aggregate<'a>(
    records: impl IntoIterator<Item = &'a AttendanceRecord>,
    rolls: &BTreeSet<RollId>,
    watched: &BTreeSet<AttendanceState>,
) -> IncidentCounts {
    let mut counts = IncidentCounts::new();
    for record in records {
        if rolls.contains(&record.roll_id) && watched.contains(&record.state) {
            *counts.entry(record.student_id).or_insert(0) += 1;
        }
    }
    counts
}

pub async fn collect(
    source: &dyn AttendanceSource,
    rolls: &[RollId],
    watched: &BTreeSet<AttendanceState>,
) -> Result<IncidentCounts, StoreError> {
    if rolls.is_empty() || watched.is_empty() {
        return Ok(IncidentCounts::new());
    }
    source.incident_counts(rolls, watched).await
}

/// Adds a zero count for every rostered student with no incidents.
///
/// Unlike a plain `HAVING COUNT(*)` query, this lets students rolled in the
/// window with no incidents qualify under `<`.
pub fn with_roster(mut counts: IncidentCounts, roster: &BTreeSet<StudentId>) -> IncidentCounts {
    for student_id in roster {
        counts.entry(*student_id).or_insert(0);
    }
    counts
}
