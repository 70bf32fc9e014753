use thiserror::Error;

use crate::models::GroupId;

/// Read or write failure against the attendance or group tables.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("group {0} was removed while its membership was being replaced")]
    GroupVanished(GroupId),
}

/// A group definition that cannot be evaluated as stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("no watched attendance states")]
    NoWatchedStates,
    #[error("watched state `{0}` is not part of the attendance vocabulary")]
    UnknownState(String),
    #[error("no incident threshold")]
    MissingThreshold,
    #[error("incident threshold {0} is negative")]
    NegativeThreshold(i32),
    #[error("no comparator")]
    MissingComparator,
    #[error("unrecognised comparator `{0}`")]
    UnknownComparator(String),
    #[error("window of {0} days is negative")]
    NegativeWindow(i32),
    #[error("attendance vocabulary is empty")]
    EmptyVocabulary,
}

/// Errors surfaced by group management operations.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group {0} not found")]
    NotFound(GroupId),
    #[error("invalid group: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures that abort a whole pass.
#[derive(Debug, Error)]
pub enum RecomputeError {
    #[error("failed to load group definitions: {0}")]
    Snapshot(#[source] StoreError),
}
