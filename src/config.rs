use std::collections::BTreeSet;

use clap::Args;

use crate::error::ConfigurationError;
use crate::models::AttendanceState;

pub const DEFAULT_ATTENDANCE_STATES: &str = "present,late,absent,excused,unexplained,unmark";

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
    /// Upper bound on groups recomputed at the same time
    #[arg(long, env = "RECOMPUTE_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,
    /// Comma-separated attendance states this deployment records
    #[arg(long, env = "ATTENDANCE_STATES", default_value = DEFAULT_ATTENDANCE_STATES)]
    pub attendance_states: String,
    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Settings {
    pub fn vocabulary(&self) -> Result<AttendanceVocabulary, ConfigurationError> {
        AttendanceVocabulary::parse(&self.attendance_states)
    }

    pub fn worker_limit(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// The set of attendance states a deployment records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceVocabulary {
    states: BTreeSet<AttendanceState>,
}

impl AttendanceVocabulary {
    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        let states: BTreeSet<AttendanceState> = raw
            .split(',')
            .filter(|value| !value.trim().is_empty())
            .map(AttendanceState::new)
            .collect();
        if states.is_empty() {
            return Err(ConfigurationError::EmptyVocabulary);
        }
        Ok(Self { states })
    }

    pub fn contains(&self, state: &AttendanceState) -> bool {
        self.states.contains(state)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttendanceState> {
        self.states.iter()
    }
}

impl Default for AttendanceVocabulary {
    fn default() -> Self {
        Self {
            states: DEFAULT_ATTENDANCE_STATES
                .split(',')
                .map(AttendanceState::new)
                .collect(),
        }
    }
}
