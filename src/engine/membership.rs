use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{GroupId, Selection};

/// The only write path for membership rows and group summary fields.
#[async_trait]
pub trait MembershipWriter: Send + Sync {
    /// Replaces the membership of `group_id` with `members` and stamps the
    /// summary fields, as one unit. Returns the new member count.
    async fn replace_membership(
        &self,
        group_id: GroupId,
        members: &Selection,
        run_at: DateTime<Utc>,
    ) -> Result<u32, StoreError>;
}

pub(super) struct PgMembershipWriter {
    pool: PgPool,
}

impl PgMembershipWriter {
    pub(super) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipWriter for PgMembershipWriter {
    async fn replace_membership(
        &self,
        group_id: GroupId,
        members: &Selection,
        run_at: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent passes on the same group across processes.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;

        let locked: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM attendance_groups.groups WHERE id = $1 FOR UPDATE",
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Err(StoreError::GroupVanished(group_id));
        }

        sqlx::query("DELETE FROM attendance_groups.group_students WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        if !members.is_empty() {
            let student_ids: Vec<Uuid> = members.keys().copied().collect();
            let incident_counts: Vec<i32> = members
                .values()
                .map(|count| i32::try_from(*count).unwrap_or(i32::MAX))
                .collect();
            sqlx::query(
                r#"
                INSERT INTO attendance_groups.group_students (group_id, student_id, incident_count)
                SELECT $1, member.student_id, member.incident_count
                FROM UNNEST($2::uuid[], $3::int4[]) AS member(student_id, incident_count)
                JOIN attendance_groups.students s ON s.id = member.student_id
                "#,
            )
            .bind(group_id)
            .bind(&student_ids)
            .bind(&incident_counts)
            .execute(&mut *tx)
            .await?;
        }

        let stored: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attendance_groups.group_students WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;
        let member_count = i32::try_from(stored).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            UPDATE attendance_groups.groups
            SET student_count = $2, run_at = $3
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .bind(member_count)
        .bind(run_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(u32::try_from(member_count).unwrap_or(0))
    }
}
