//! Group management operations.
//!
//! Definitions are validated structurally here. A filter that parses but
//! cannot be evaluated is still stored; the next pass reports it as skipped.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AttendanceVocabulary;
use crate::error::GroupError;
use crate::models::{GroupFilter, GroupId, GroupMember, GroupPatch, GroupRecord, NewGroup};
use crate::store::GroupCatalog;

pub struct GroupService {
    catalog: Arc<dyn GroupCatalog>,
    vocabulary: AttendanceVocabulary,
}

impl GroupService {
    pub fn new(catalog: Arc<dyn GroupCatalog>, vocabulary: AttendanceVocabulary) -> Self {
        Self {
            catalog,
            vocabulary,
        }
    }

    pub async fn list(&self) -> Result<Vec<GroupRecord>, GroupError> {
        Ok(self.catalog.list_groups().await?)
    }

    pub async fn get(&self, id: GroupId) -> Result<GroupRecord, GroupError> {
        self.catalog
            .find_group(id)
            .await?
            .ok_or(GroupError::NotFound(id))
    }

    pub async fn create(&self, group: NewGroup) -> Result<GroupRecord, GroupError> {
        let group = NewGroup {
            name: group.name.trim().to_string(),
            roll_states: normalise_states(&group.roll_states),
            ltmt: group.ltmt.map(|ltmt| ltmt.trim().to_string()),
            ..group
        };
        validate_name(&group.name)?;
        validate_non_negative("window_days", Some(group.window_days))?;
        validate_non_negative("incidents", group.incidents)?;

        let record = self.catalog.insert_group(&group).await?;
        self.warn_if_unusable(&record);
        info!(group_id = %record.id, name = %record.name, "group created");
        Ok(record)
    }

    /// Applies only the fields present in `patch`.
    pub async fn update(&self, id: GroupId, patch: GroupPatch) -> Result<GroupRecord, GroupError> {
        let patch = GroupPatch {
            name: patch.name.map(|name| name.trim().to_string()),
            roll_states: patch.roll_states.as_deref().map(normalise_states),
            ltmt: patch.ltmt.map(|ltmt| ltmt.trim().to_string()),
            ..patch
        };
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        validate_non_negative("window_days", patch.window_days)?;
        validate_non_negative("incidents", patch.incidents)?;
        if patch.is_empty() {
            return self.get(id).await;
        }

        let record = self
            .catalog
            .update_group(id, &patch)
            .await?
            .ok_or(GroupError::NotFound(id))?;
        self.warn_if_unusable(&record);
        info!(group_id = %record.id, "group updated");
        Ok(record)
    }

    pub async fn delete(&self, id: GroupId) -> Result<(), GroupError> {
        if !self.catalog.delete_group(id).await? {
            return Err(GroupError::NotFound(id));
        }
        info!(group_id = %id, "group deleted");
        Ok(())
    }

    /// Current members of a group; empty for unknown ids.
    pub async fn members(&self, id: GroupId) -> Result<Vec<GroupMember>, GroupError> {
        Ok(self.catalog.group_members(id).await?)
    }

    fn warn_if_unusable(&self, record: &GroupRecord) {
        if let Err(err) = GroupFilter::parse(record, &self.vocabulary) {
            warn!(
                group_id = %record.id,
                reason = %err,
                "group filter cannot be evaluated and will be skipped by recompute"
            );
        }
    }
}

fn normalise_states(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .filter(|state| !state.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(",")
}

fn validate_name(name: &str) -> Result<(), GroupError> {
    if name.is_empty() {
        return Err(GroupError::Invalid("name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_non_negative(field: &str, value: Option<i32>) -> Result<(), GroupError> {
    match value {
        Some(value) if value < 0 => Err(GroupError::Invalid(format!(
            "{field} must not be negative, got {value}"
        ))),
        _ => Ok(()),
    }
}
