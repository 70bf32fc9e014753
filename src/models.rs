use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AttendanceVocabulary;
use crate::error::ConfigurationError;
use crate::threshold::Comparator;

pub type StudentId = Uuid;
pub type RollId = Uuid;
pub type GroupId = Uuid;

/// Incident counts keyed by student. Students without incidents are absent.
pub type IncidentCounts = BTreeMap<StudentId, u32>;

/// Students selected into a group, with the incident count that qualified them.
pub type Selection = BTreeMap<StudentId, u32>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttendanceState(String);

impl AttendanceState {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttendanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: StudentId,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone)]
pub struct Roll {
    pub id: RollId,
    pub name: String,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub roll_id: RollId,
    pub student_id: StudentId,
    pub state: AttendanceState,
}

/// A row from `attendance_groups.groups`, filter fields still in their stored text form.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub window_days: i32,
    pub roll_states: String,
    pub incidents: Option<i32>,
    pub ltmt: Option<String>,
    pub student_count: i32,
    pub run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Parsed filter of a group, ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFilter {
    pub window_days: u32,
    pub watched_states: BTreeSet<AttendanceState>,
    pub threshold: u32,
    pub comparator: Comparator,
}

impl GroupFilter {
    pub fn parse(
        record: &GroupRecord,
        vocabulary: &AttendanceVocabulary,
    ) -> Result<Self, ConfigurationError> {
        let window_days = u32::try_from(record.window_days)
            .map_err(|_| ConfigurationError::NegativeWindow(record.window_days))?;

        let mut watched_states = BTreeSet::new();
        for raw in record.roll_states.split(',') {
            if raw.trim().is_empty() {
                continue;
            }
            let state = AttendanceState::new(raw);
            if !vocabulary.contains(&state) {
                return Err(ConfigurationError::UnknownState(state.to_string()));
            }
            watched_states.insert(state);
        }
        if watched_states.is_empty() {
            return Err(ConfigurationError::NoWatchedStates);
        }

        let incidents = record
            .incidents
            .ok_or(ConfigurationError::MissingThreshold)?;
        let threshold = u32::try_from(incidents)
            .map_err(|_| ConfigurationError::NegativeThreshold(incidents))?;

        let symbol = record
            .ltmt
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ConfigurationError::MissingComparator)?;
        let comparator = symbol
            .parse::<Comparator>()
            .map_err(|_| ConfigurationError::UnknownComparator(symbol.to_string()))?;

        Ok(Self {
            window_days,
            watched_states,
            threshold,
            comparator,
        })
    }
}

/// One entry of a pass snapshot. The filter is parsed once, at load time.
#[derive(Debug, Clone)]
pub struct GroupDefinition {
    pub id: GroupId,
    pub name: String,
    pub stored_count: u32,
    pub filter: Result<GroupFilter, ConfigurationError>,
}

impl GroupDefinition {
    pub fn load(record: &GroupRecord, vocabulary: &AttendanceVocabulary) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            stored_count: u32::try_from(record.student_count).unwrap_or(0),
            filter: GroupFilter::parse(record, vocabulary),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub window_days: i32,
    pub roll_states: String,
    pub incidents: Option<i32>,
    pub ltmt: Option<String>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub window_days: Option<i32>,
    pub roll_states: Option<String>,
    pub incidents: Option<i32>,
    pub ltmt: Option<String>,
}

impl GroupPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.window_days.is_none()
            && self.roll_states.is_none()
            && self.incidents.is_none()
            && self.ltmt.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct GroupMember {
    pub student_id: StudentId,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

impl GroupMember {
    pub fn from_student(student: &Student) -> Self {
        Self {
            student_id: student.id,
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            full_name: format!("{} {}", student.first_name, student.last_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Ok,
    SkippedConfigError,
    Failed,
    Cancelled,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Ok => "OK",
            OutcomeStatus::SkippedConfigError => "SKIPPED_CONFIG_ERROR",
            OutcomeStatus::Failed => "FAILED",
            OutcomeStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one group's pipeline within a pass.
///
/// `member_count` is the freshly written count for `Ok` and the count still
/// stored from the previous pass for every other status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub group_id: GroupId,
    pub group_name: String,
    pub status: OutcomeStatus,
    pub member_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GroupOutcome {
    pub fn ok(definition: &GroupDefinition, member_count: u32) -> Self {
        Self::new(definition, OutcomeStatus::Ok, member_count, None)
    }

    pub fn skipped(definition: &GroupDefinition, error: &ConfigurationError) -> Self {
        Self::new(
            definition,
            OutcomeStatus::SkippedConfigError,
            definition.stored_count,
            Some(error.to_string()),
        )
    }

    pub fn failed(definition: &GroupDefinition, reason: impl fmt::Display) -> Self {
        Self::new(
            definition,
            OutcomeStatus::Failed,
            definition.stored_count,
            Some(reason.to_string()),
        )
    }

    pub fn cancelled(definition: &GroupDefinition) -> Self {
        Self::new(
            definition,
            OutcomeStatus::Cancelled,
            definition.stored_count,
            Some("pass cancelled before this group started".to_string()),
        )
    }

    fn new(
        definition: &GroupDefinition,
        status: OutcomeStatus,
        member_count: u32,
        reason: Option<String>,
    ) -> Self {
        Self {
            group_id: definition.id,
            group_name: definition.name.clone(),
            status,
            member_count,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<GroupOutcome>,
}

impl PassReport {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    pub fn outcome(&self, group_id: GroupId) -> Option<&GroupOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.group_id == group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(roll_states: &str, incidents: Option<i32>, ltmt: Option<&str>) -> GroupRecord {
        GroupRecord {
            id: Uuid::new_v4(),
            name: "Chronic absence".to_string(),
            window_days: 14,
            roll_states: roll_states.to_string(),
            incidents,
            ltmt: ltmt.map(str::to_string),
            student_count: 3,
            run_at: None,
            created_at: Utc::now(),
        }
    }

    fn vocabulary() -> AttendanceVocabulary {
        AttendanceVocabulary::parse("present,late,absent,excused,unexplained").unwrap()
    }

    #[test]
    fn parses_comma_joined_states_and_symbol() {
        let filter = GroupFilter::parse(&record("late, Absent", Some(2), Some(">")), &vocabulary())
            .unwrap();
        assert_eq!(filter.window_days, 14);
        assert_eq!(filter.threshold, 2);
        assert_eq!(filter.comparator, Comparator::GreaterThan);
        assert!(filter.watched_states.contains(&AttendanceState::new("absent")));
        assert!(filter.watched_states.contains(&AttendanceState::new("late")));
    }

    #[test]
    fn zero_threshold_is_a_usable_filter() {
        let filter = GroupFilter::parse(&record("late", Some(0), Some("<")), &vocabulary());
        assert!(filter.is_ok());
    }

    #[test]
    fn rejects_unusable_filters() {
        let vocab = vocabulary();
        assert_eq!(
            GroupFilter::parse(&record(" , ", Some(2), Some(">")), &vocab),
            Err(ConfigurationError::NoWatchedStates)
        );
        assert_eq!(
            GroupFilter::parse(&record("late", None, Some(">")), &vocab),
            Err(ConfigurationError::MissingThreshold)
        );
        assert_eq!(
            GroupFilter::parse(&record("late", Some(-1), Some(">")), &vocab),
            Err(ConfigurationError::NegativeThreshold(-1))
        );
        assert_eq!(
            GroupFilter::parse(&record("late", Some(1), None), &vocab),
            Err(ConfigurationError::MissingComparator)
        );
        assert_eq!(
            GroupFilter::parse(&record("late", Some(1), Some(">=")), &vocab),
            Err(ConfigurationError::UnknownComparator(">=".to_string()))
        );
        assert_eq!(
            GroupFilter::parse(&record("tardy", Some(1), Some(">")), &vocab),
            Err(ConfigurationError::UnknownState("tardy".to_string()))
        );
    }

    #[test]
    fn skipped_outcome_keeps_stored_count() {
        let definition = GroupDefinition::load(&record("", Some(1), Some(">")), &vocabulary());
        let error = definition.filter.clone().unwrap_err();
        let outcome = GroupOutcome::skipped(&definition, &error);
        assert_eq!(outcome.status, OutcomeStatus::SkippedConfigError);
        assert_eq!(outcome.member_count, 3);
        assert!(outcome.reason.is_some());
    }

    #[test]
    fn member_full_name_joins_with_single_space() {
        let student = Student {
            id: Uuid::new_v4(),
            first_name: "Avery".to_string(),
            last_name: "Lee".to_string(),
        };
        assert_eq!(GroupMember::from_student(&student).full_name, "Avery Lee");
    }
}
