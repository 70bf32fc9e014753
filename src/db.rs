use std::collections::BTreeSet;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::config::AttendanceVocabulary;
use crate::error::StoreError;
use crate::models::{
    AttendanceState, GroupId, GroupMember, GroupPatch, GroupRecord, IncidentCounts, NewGroup,
    RollId, StudentId,
};
use crate::store::{AttendanceSource, GroupCatalog};
use crate::window::RollWindow;

const GROUP_COLUMNS: &str = "id, name, window_days, roll_states, incidents, ltmt, \
     student_count, run_at, created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool, now: DateTime<Utc>) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery",
            "Lee",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules",
            "Moreno",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara",
            "Patel",
        ),
    ];

    for (id, first_name, last_name) in &students {
        sqlx::query(
            r#"
            INSERT INTO attendance_groups.students (id, first_name, last_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name
            "#,
        )
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .execute(pool)
        .await?;
    }

    let rolls = vec![
        (
            Uuid::parse_str("5b1f0f52-8a43-4a0e-9d4c-0f0e8f1c2a01")?,
            "Homeroom week 1",
            Some(now - Duration::days(9)),
            ["unexplained", "present", "present"],
        ),
        (
            Uuid::parse_str("5b1f0f52-8a43-4a0e-9d4c-0f0e8f1c2a02")?,
            "Homeroom week 2",
            Some(now - Duration::days(5)),
            ["unexplained", "unexplained", "late"],
        ),
        (
            Uuid::parse_str("5b1f0f52-8a43-4a0e-9d4c-0f0e8f1c2a03")?,
            "Homeroom week 3",
            Some(now - Duration::days(1)),
            ["unexplained", "unexplained", "present"],
        ),
        (
            Uuid::parse_str("5b1f0f52-8a43-4a0e-9d4c-0f0e8f1c2a04")?,
            "Homeroom week 4",
            None,
            ["present", "present", "present"],
        ),
    ];

    for (roll_id, name, completed_at, states) in rolls {
        sqlx::query(
            r#"
            INSERT INTO attendance_groups.rolls (id, name, completed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(roll_id)
        .bind(name)
        .bind(completed_at)
        .execute(pool)
        .await?;

        for ((student_id, _, _), state) in students.iter().zip(states) {
            insert_roll_state(pool, roll_id, *student_id, state).await?;
        }
    }

    sqlx::query(
        r#"
        INSERT INTO attendance_groups.groups (id, name, window_days, roll_states, incidents, ltmt)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(Uuid::parse_str("9a3c2d10-6f5e-4c1b-8d7a-1e2f3a4b5c6d")?)
    .bind("Frequent unexplained absence")
    .bind(14)
    .bind("unexplained")
    .bind(2)
    .bind(">")
    .execute(pool)
    .await?;

    Ok(())
}

async fn insert_roll_state(
    pool: &PgPool,
    roll_id: RollId,
    student_id: StudentId,
    state: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance_groups.roll_states (roll_id, student_id, state)
        VALUES ($1, $2, $3)
        ON CONFLICT (roll_id, student_id) DO NOTHING
        "#,
    )
    .bind(roll_id)
    .bind(student_id)
    .bind(state)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub rejected: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct CsvRow {
    pub roll_id: Uuid,
    pub roll_name: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub student_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub state: String,
}

pub fn read_csv<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<CsvRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        rows.push(result.with_context(|| format!("malformed attendance row {}", line + 1))?);
    }
    Ok(rows)
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    vocabulary: &AttendanceVocabulary,
) -> anyhow::Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = read_csv(file)?;
    let mut summary = ImportSummary::default();

    for row in rows {
        let state = AttendanceState::new(&row.state);
        if !vocabulary.contains(&state) {
            warn!(
                roll_id = %row.roll_id,
                student_id = %row.student_id,
                state = %state,
                "rejecting attendance row with unknown state"
            );
            summary.rejected += 1;
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO attendance_groups.students (id, first_name, last_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name
            "#,
        )
        .bind(row.student_id)
        .bind(&row.first_name)
        .bind(&row.last_name)
        .execute(pool)
        .await?;

        let roll_name = row
            .roll_name
            .clone()
            .unwrap_or_else(|| format!("import-{}", row.roll_id));
        sqlx::query(
            r#"
            INSERT INTO attendance_groups.rolls (id, name, completed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET completed_at = COALESCE(attendance_groups.rolls.completed_at, EXCLUDED.completed_at)
            "#,
        )
        .bind(row.roll_id)
        .bind(roll_name)
        .bind(row.completed_at)
        .execute(pool)
        .await?;

        if insert_roll_state(pool, row.roll_id, row.student_id, state.as_str()).await? {
            summary.inserted += 1;
        }
    }

    Ok(summary)
}

/// Postgres implementation of the attendance and group-catalog seams.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceSource for PgStore {
    async fn completed_rolls(&self, window: &RollWindow) -> Result<Vec<RollId>, StoreError> {
        let rolls: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM attendance_groups.rolls
            WHERE completed_at IS NOT NULL
              AND ($1::timestamptz IS NULL OR completed_at >= $1)
              AND completed_at <= $2
            "#,
        )
        .bind(window.lower_bound())
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rolls)
    }

    async fn incident_counts(
        &self,
        rolls: &[RollId],
        watched: &BTreeSet<AttendanceState>,
    ) -> Result<IncidentCounts, StoreError> {
        let states: Vec<String> = watched.iter().map(|state| state.to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT student_id, COUNT(*) AS incident_count
            FROM attendance_groups.roll_states
            WHERE roll_id = ANY($1) AND state = ANY($2)
            GROUP BY student_id
            "#,
        )
        .bind(rolls)
        .bind(&states)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = IncidentCounts::new();
        for row in rows {
            let student_id: Uuid = row.try_get("student_id")?;
            let incident_count: i64 = row.try_get("incident_count")?;
            counts.insert(student_id, u32::try_from(incident_count).unwrap_or(u32::MAX));
        }
        Ok(counts)
    }

    async fn rolled_students(&self, rolls: &[RollId]) -> Result<BTreeSet<StudentId>, StoreError> {
        let students: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT student_id FROM attendance_groups.roll_states WHERE roll_id = ANY($1)",
        )
        .bind(rolls)
        .fetch_all(&self.pool)
        .await?;
        Ok(students.into_iter().collect())
    }
}

#[async_trait]
impl GroupCatalog for PgStore {
    async fn list_groups(&self) -> Result<Vec<GroupRecord>, StoreError> {
        let query = format!(
            "SELECT {GROUP_COLUMNS} FROM attendance_groups.groups ORDER BY created_at, id"
        );
        Ok(sqlx::query_as::<_, GroupRecord>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_group(&self, id: GroupId) -> Result<Option<GroupRecord>, StoreError> {
        let query = format!("SELECT {GROUP_COLUMNS} FROM attendance_groups.groups WHERE id = $1");
        Ok(sqlx::query_as::<_, GroupRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_group(&self, group: &NewGroup) -> Result<GroupRecord, StoreError> {
        let query = format!(
            "INSERT INTO attendance_groups.groups \
             (id, name, window_days, roll_states, incidents, ltmt) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {GROUP_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, GroupRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(&group.name)
            .bind(group.window_days)
            .bind(&group.roll_states)
            .bind(group.incidents)
            .bind(&group.ltmt)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_group(
        &self,
        id: GroupId,
        patch: &GroupPatch,
    ) -> Result<Option<GroupRecord>, StoreError> {
        // student_count and run_at are deliberately absent from this statement.
        let query = format!(
            "UPDATE attendance_groups.groups SET \
             name = COALESCE($2, name), \
             window_days = COALESCE($3, window_days), \
             roll_states = COALESCE($4, roll_states), \
             incidents = COALESCE($5, incidents), \
             ltmt = COALESCE($6, ltmt) \
             WHERE id = $1 \
             RETURNING {GROUP_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, GroupRecord>(&query)
            .bind(id)
            .bind(&patch.name)
            .bind(patch.window_days)
            .bind(&patch.roll_states)
            .bind(patch.incidents)
            .bind(&patch.ltmt)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_group(&self, id: GroupId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM attendance_groups.groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn group_members(&self, id: GroupId) -> Result<Vec<GroupMember>, StoreError> {
        Ok(sqlx::query_as::<_, GroupMember>(
            r#"
            SELECT s.id AS student_id, s.first_name, s.last_name,
                   s.first_name || ' ' || s.last_name AS full_name
            FROM attendance_groups.group_students gs
            JOIN attendance_groups.students s ON s.id = gs.student_id
            WHERE gs.group_id = $1
            ORDER BY s.last_name, s.first_name, s.id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?)
    }
}
