//! In-memory store used by tests, with failure injection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engine::membership::MembershipWriter;
use crate::error::StoreError;
use crate::incidents;
use crate::models::{
    AttendanceRecord, AttendanceState, GroupId, GroupMember, GroupPatch, GroupRecord,
    IncidentCounts, NewGroup, Roll, RollId, Selection, Student, StudentId,
};
use crate::store::{AttendanceSource, GroupCatalog};
use crate::window::{self, RollWindow};

#[derive(Default)]
struct State {
    students: BTreeMap<StudentId, Student>,
    rolls: Vec<Roll>,
    records: Vec<AttendanceRecord>,
    groups: Vec<GroupRecord>,
    memberships: BTreeMap<GroupId, Selection>,
    fail_snapshot: bool,
    failing_writes: BTreeSet<GroupId>,
    failing_counts: BTreeSet<AttendanceState>,
    vanish_on_write: BTreeSet<GroupId>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn injected() -> StoreError {
    StoreError::Database(sqlx::Error::Protocol("injected failure".to_string()))
}

impl MemoryStore {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock")
    }

    pub fn add_student(&self, first_name: &str, last_name: &str) -> StudentId {
        let id = Uuid::new_v4();
        self.state().students.insert(
            id,
            Student {
                id,
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            },
        );
        id
    }

    pub fn add_roll(&self, completed_at: Option<DateTime<Utc>>) -> RollId {
        let id = Uuid::new_v4();
        self.state().rolls.push(Roll {
            id,
            name: format!("roll-{id}"),
            completed_at,
        });
        id
    }

    pub fn record(&self, roll_id: RollId, student_id: StudentId, state: &str) {
        self.state().records.push(AttendanceRecord {
            roll_id,
            student_id,
            state: AttendanceState::new(state),
        });
    }

    pub fn add_group(&self, group: &NewGroup) -> GroupId {
        let record = new_record(group);
        let id = record.id;
        self.state().groups.push(record);
        id
    }

    pub fn patch_group(&self, id: GroupId, patch: &GroupPatch) {
        let mut state = self.state();
        if let Some(record) = state.groups.iter_mut().find(|group| group.id == id) {
            apply_patch(record, patch);
        }
    }

    pub fn group(&self, id: GroupId) -> GroupRecord {
        self.state()
            .groups
            .iter()
            .find(|group| group.id == id)
            .cloned()
            .expect("group exists")
    }

    pub fn membership(&self, id: GroupId) -> Selection {
        self.state()
            .memberships
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_snapshot(&self) {
        self.state().fail_snapshot = true;
    }

    pub fn fail_writes_for(&self, id: GroupId) {
        self.state().failing_writes.insert(id);
    }

    /// Incident reads that watch `state` fail.
    pub fn fail_counts_for(&self, state: &str) {
        self.state().failing_counts.insert(AttendanceState::new(state));
    }

    /// Deletes the group just before its next membership write lands.
    pub fn delete_on_write(&self, id: GroupId) {
        self.state().vanish_on_write.insert(id);
    }

    pub fn has_group(&self, id: GroupId) -> bool {
        self.state().groups.iter().any(|group| group.id == id)
    }
}

fn new_record(group: &NewGroup) -> GroupRecord {
    GroupRecord {
        id: Uuid::new_v4(),
        name: group.name.clone(),
        window_days: group.window_days,
        roll_states: group.roll_states.clone(),
        incidents: group.incidents,
        ltmt: group.ltmt.clone(),
        student_count: 0,
        run_at: None,
        created_at: Utc::now(),
    }
}

fn apply_patch(record: &mut GroupRecord, patch: &GroupPatch) {
    if let Some(name) = &patch.name {
        record.name = name.clone();
    }
    if let Some(window_days) = patch.window_days {
        record.window_days = window_days;
    }
    if let Some(roll_states) = &patch.roll_states {
        record.roll_states = roll_states.clone();
    }
    if let Some(incidents) = patch.incidents {
        record.incidents = Some(incidents);
    }
    if let Some(ltmt) = &patch.ltmt {
        record.ltmt = Some(ltmt.clone());
    }
}

#[async_trait]
impl AttendanceSource for MemoryStore {
    async fn completed_rolls(&self, window: &RollWindow) -> Result<Vec<RollId>, StoreError> {
        Ok(window::select_rolls(&self.state().rolls, window))
    }

    async fn incident_counts(
        &self,
        rolls: &[RollId],
        watched: &BTreeSet<AttendanceState>,
    ) -> Result<IncidentCounts, StoreError> {
        let state = self.state();
        if !state.failing_counts.is_disjoint(watched) {
            return Err(injected());
        }
        let rolls: BTreeSet<RollId> = rolls.iter().copied().collect();
        Ok(incidents::aggregate(&state.records, &rolls, watched))
    }

    async fn rolled_students(&self, rolls: &[RollId]) -> Result<BTreeSet<StudentId>, StoreError> {
        Ok(self
            .state()
            .records
            .iter()
            .filter(|record| rolls.contains(&record.roll_id))
            .map(|record| record.student_id)
            .collect())
    }
}

#[async_trait]
impl GroupCatalog for MemoryStore {
    async fn list_groups(&self) -> Result<Vec<GroupRecord>, StoreError> {
        let state = self.state();
        if state.fail_snapshot {
            return Err(injected());
        }
        Ok(state.groups.clone())
    }

    async fn find_group(&self, id: GroupId) -> Result<Option<GroupRecord>, StoreError> {
        Ok(self.state().groups.iter().find(|group| group.id == id).cloned())
    }

    async fn insert_group(&self, group: &NewGroup) -> Result<GroupRecord, StoreError> {
        let record = new_record(group);
        self.state().groups.push(record.clone());
        Ok(record)
    }

    async fn update_group(
        &self,
        id: GroupId,
        patch: &GroupPatch,
    ) -> Result<Option<GroupRecord>, StoreError> {
        let mut state = self.state();
        Ok(state
            .groups
            .iter_mut()
            .find(|group| group.id == id)
            .map(|record| {
                apply_patch(record, patch);
                record.clone()
            }))
    }

    async fn delete_group(&self, id: GroupId) -> Result<bool, StoreError> {
        let mut state = self.state();
        let before = state.groups.len();
        state.groups.retain(|group| group.id != id);
        state.memberships.remove(&id);
        Ok(state.groups.len() != before)
    }

    async fn group_members(&self, id: GroupId) -> Result<Vec<GroupMember>, StoreError> {
        let state = self.state();
        let mut members: Vec<GroupMember> = state
            .memberships
            .get(&id)
            .into_iter()
            .flat_map(|selection| selection.keys())
            .filter_map(|student_id| state.students.get(student_id))
            .map(GroupMember::from_student)
            .collect();
        members.sort_by(|a, b| {
            (&a.last_name, &a.first_name, a.student_id).cmp(&(&b.last_name, &b.first_name, b.student_id))
        });
        Ok(members)
    }
}

#[async_trait]
impl MembershipWriter for MemoryStore {
    async fn replace_membership(
        &self,
        group_id: GroupId,
        members: &Selection,
        run_at: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let mut state = self.state();
        if state.failing_writes.contains(&group_id) {
            return Err(injected());
        }
        if state.vanish_on_write.remove(&group_id) {
            state.groups.retain(|group| group.id != group_id);
            state.memberships.remove(&group_id);
        }
        if !state.groups.iter().any(|group| group.id == group_id) {
            return Err(StoreError::GroupVanished(group_id));
        }

        let kept: Selection = members
            .iter()
            .filter(|(student_id, _)| state.students.contains_key(student_id))
            .map(|(student_id, count)| (*student_id, *count))
            .collect();
        let member_count = kept.len() as u32;
        state.memberships.insert(group_id, kept);
        if let Some(record) = state.groups.iter_mut().find(|group| group.id == group_id) {
            record.student_count = member_count as i32;
            record.run_at = Some(run_at);
        }
        Ok(member_count)
    }
}
