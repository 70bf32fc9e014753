//! Recompute orchestrator.
//!
//! A pass snapshots every group definition, then runs each group's pipeline
//! (window selection, incident aggregation, threshold evaluation, membership
//! replacement) independently. A failing group is reported and left at its
//! previous state; only a failed snapshot aborts the pass.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use sqlx::PgPool;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::config::AttendanceVocabulary;
use crate::db::PgStore;
use crate::error::{RecomputeError, StoreError};
use crate::incidents;
use crate::models::{
    GroupDefinition, GroupFilter, GroupId, GroupOutcome, OutcomeStatus, PassReport,
};
use crate::store::{AttendanceSource, GroupCatalog};
use crate::threshold;
use crate::window::RollWindow;

pub(crate) mod membership;

use membership::{MembershipWriter, PgMembershipWriter};

/// Caller side of a pass cancellation.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Checked before each group starts; a group already running finishes its unit.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(tx), CancelSignal(rx))
    }

    pub fn never() -> CancelSignal {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

pub struct Engine {
    attendance: Arc<dyn AttendanceSource>,
    catalog: Arc<dyn GroupCatalog>,
    writer: Arc<dyn MembershipWriter>,
    vocabulary: AttendanceVocabulary,
    concurrency: usize,
    group_locks: Mutex<HashMap<GroupId, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn postgres(pool: PgPool, vocabulary: AttendanceVocabulary, concurrency: usize) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        Self::with_parts(
            store.clone(),
            store,
            Arc::new(PgMembershipWriter::new(pool)),
            vocabulary,
            concurrency,
        )
    }

    pub(crate) fn with_parts(
        attendance: Arc<dyn AttendanceSource>,
        catalog: Arc<dyn GroupCatalog>,
        writer: Arc<dyn MembershipWriter>,
        vocabulary: AttendanceVocabulary,
        concurrency: usize,
    ) -> Self {
        Self {
            attendance,
            catalog,
            writer,
            vocabulary,
            concurrency: concurrency.max(1),
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn recompute_all(&self, now: DateTime<Utc>) -> Result<PassReport, RecomputeError> {
        self.recompute_all_with_cancel(now, CancelSignal::never())
            .await
    }

    pub async fn recompute_all_with_cancel(
        &self,
        now: DateTime<Utc>,
        cancel: CancelSignal,
    ) -> Result<PassReport, RecomputeError> {
        let records = self
            .catalog
            .list_groups()
            .await
            .map_err(RecomputeError::Snapshot)?;
        let definitions: Vec<GroupDefinition> = records
            .iter()
            .map(|record| GroupDefinition::load(record, &self.vocabulary))
            .collect();
        info!(groups = definitions.len(), started_at = %now, "recompute pass started");

        let outcomes: Vec<GroupOutcome> = stream::iter(definitions)
            .map(move |definition| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return GroupOutcome::cancelled(&definition);
                    }
                    self.run_group(&definition, now).await
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for outcome in &outcomes {
            log_outcome(outcome);
        }
        self.release_idle_locks().await;

        let report = PassReport {
            started_at: now,
            outcomes,
        };
        info!(
            ok = report.count(OutcomeStatus::Ok),
            skipped = report.count(OutcomeStatus::SkippedConfigError),
            failed = report.count(OutcomeStatus::Failed),
            cancelled = report.count(OutcomeStatus::Cancelled),
            "recompute pass finished"
        );
        Ok(report)
    }

    async fn run_group(&self, definition: &GroupDefinition, now: DateTime<Utc>) -> GroupOutcome {
        let filter = match &definition.filter {
            Ok(filter) => filter,
            Err(err) => return GroupOutcome::skipped(definition, err),
        };

        let lock = self.group_lock(definition.id).await;
        let _guard = lock.lock().await;

        match self.apply_filter(definition.id, filter, now).await {
            Ok(member_count) => GroupOutcome::ok(definition, member_count),
            Err(err) => GroupOutcome::failed(definition, err),
        }
    }

    async fn apply_filter(
        &self,
        group_id: GroupId,
        filter: &GroupFilter,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let window = RollWindow::trailing(filter.window_days, now);
        let rolls = self.attendance.completed_rolls(&window).await?;

        let counts =
            incidents::collect(self.attendance.as_ref(), &rolls, &filter.watched_states).await?;
        let roster = if rolls.is_empty() {
            BTreeSet::new()
        } else {
            self.attendance.rolled_students(&rolls).await?
        };
        let counts = incidents::with_roster(counts, &roster);

        let selection = threshold::evaluate(&counts, filter.threshold, filter.comparator);
        self.writer
            .replace_membership(group_id, &selection, now)
            .await
    }

    async fn group_lock(&self, group_id: GroupId) -> Arc<Mutex<()>> {
        let mut locks = self.group_locks.lock().await;
        locks
            .entry(group_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops locks no running group holds, so deleted groups do not linger.
    async fn release_idle_locks(&self) {
        self.group_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    async fn held_locks(&self) -> usize {
        self.group_locks.lock().await.len()
    }
}

pub(crate) fn log_outcome(outcome: &GroupOutcome) {
    let reason = outcome.reason.as_deref().unwrap_or("");
    match outcome.status {
        OutcomeStatus::Ok => info!(
            group_id = %outcome.group_id,
            status = %outcome.status,
            member_count = outcome.member_count,
            "group recomputed"
        ),
        OutcomeStatus::SkippedConfigError => warn!(
            group_id = %outcome.group_id,
            status = %outcome.status,
            member_count = outcome.member_count,
            reason,
            "group skipped"
        ),
        OutcomeStatus::Failed => error!(
            group_id = %outcome.group_id,
            status = %outcome.status,
            member_count = outcome.member_count,
            reason,
            "group failed"
        ),
        OutcomeStatus::Cancelled => info!(
            group_id = %outcome.group_id,
            status = %outcome.status,
            member_count = outcome.member_count,
            "group not started"
        ),
    }
}
