//! Storage seams used by the recompute engine and the management operations.
//!
//! `AttendanceSource` is read-only. `GroupCatalog` manages group definitions
//! but has no way to write membership rows or the `student_count` / `run_at`
//! summary fields; those belong to `engine::membership::MembershipWriter`.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{
    AttendanceState, GroupId, GroupMember, GroupPatch, GroupRecord, IncidentCounts, NewGroup,
    RollId, StudentId,
};
use crate::window::RollWindow;

#[cfg(test)]
pub mod memory;

#[async_trait]
pub trait AttendanceSource: Send + Sync {
    /// Ids of completed rolls inside `window`.
    async fn completed_rolls(&self, window: &RollWindow) -> Result<Vec<RollId>, StoreError>;

    async fn incident_counts(
        &self,
        rolls: &[RollId],
        watched: &BTreeSet<AttendanceState>,
    ) -> Result<IncidentCounts, StoreError>;

    /// Students holding at least one attendance record on `rolls`.
    async fn rolled_students(&self, rolls: &[RollId]) -> Result<BTreeSet<StudentId>, StoreError>;
}

#[async_trait]
pub trait GroupCatalog: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<GroupRecord>, StoreError>;

    async fn find_group(&self, id: GroupId) -> Result<Option<GroupRecord>, StoreError>;

    async fn insert_group(&self, group: &NewGroup) -> Result<GroupRecord, StoreError>;

    async fn update_group(
        &self,
        id: GroupId,
        patch: &GroupPatch,
    ) -> Result<Option<GroupRecord>, StoreError>;

    /// Returns `false` when no group had this id.
    async fn delete_group(&self, id: GroupId) -> Result<bool, StoreError>;

    async fn group_members(&self, id: GroupId) -> Result<Vec<GroupMember>, StoreError>;
}
