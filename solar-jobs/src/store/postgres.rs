//! PostgreSQL job store
//!
//! All coordination relies on single-statement conditional updates; the claim
//! uses `FOR UPDATE SKIP LOCKED` so concurrent claimers move on to the next
//! queued row instead of blocking on one another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{JobId, JobRecord, JobState, JobsError, JobsResult, store::JobStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS solar_jobs (
    owner_id          BIGINT           NOT NULL,
    id                UUID             NOT NULL,
    job_type          TEXT             NOT NULL,
    state             TEXT             NOT NULL,
    configuration     JSONB            NOT NULL,
    percent_complete  DOUBLE PRECISION NOT NULL DEFAULT 0,
    result_count      BIGINT           NOT NULL DEFAULT 0,
    success           BOOLEAN,
    message           TEXT,
    created           TIMESTAMPTZ      NOT NULL,
    modified          TIMESTAMPTZ      NOT NULL,
    started           TIMESTAMPTZ,
    completed         TIMESTAMPTZ,
    PRIMARY KEY (owner_id, id)
);
CREATE INDEX IF NOT EXISTS solar_jobs_state_created_idx ON solar_jobs (state, created);
CREATE INDEX IF NOT EXISTS solar_jobs_completed_idx ON solar_jobs (completed) WHERE state = 'Completed';
"#;

const COLUMNS: &str = "owner_id, id, job_type, state, configuration, percent_complete, result_count, \
                       success, message, created, modified, started, completed";

/// Job store backed by a PostgreSQL table
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the job table and indexes if they do not exist
    pub async fn migrate(&self) -> JobsResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    owner_id: i64,
    id: Uuid,
    job_type: String,
    state: String,
    configuration: Value,
    percent_complete: f64,
    result_count: i64,
    success: Option<bool>,
    message: Option<String>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = JobsError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            id: JobId::from_parts(row.owner_id, row.id),
            job_type: row.job_type,
            state: row.state.parse().map_err(JobsError::Store)?,
            configuration: row.configuration,
            percent_complete: row.percent_complete,
            result_count: row.result_count,
            success: row.success,
            message: row.message,
            created: row.created,
            modified: row.modified,
            started: row.started,
            completed: row.completed,
        })
    }
}

fn state_names(states: &[JobState]) -> Vec<String> {
    states.iter().map(|s| s.name().to_string()).collect()
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn claim_oldest_queued(&self) -> JobsResult<Option<JobRecord>> {
        let sql = format!(
            r#"
            UPDATE solar_jobs SET state = 'Claimed', modified = now()
            WHERE (owner_id, id) = (
                SELECT owner_id, id FROM solar_jobs
                WHERE state = 'Queued'
                ORDER BY created, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql).fetch_optional(&self.pool).await?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn cas_state(&self, id: &JobId, desired: JobState, expected: &[JobState]) -> JobsResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE solar_jobs SET
                state = $3,
                modified = now(),
                started = CASE WHEN $3 = 'Executing' THEN COALESCE(started, now()) ELSE started END,
                completed = CASE WHEN $3 = 'Completed' THEN now() ELSE NULL END
            WHERE owner_id = $1 AND id = $2 AND state = ANY($4) AND state <> 'Completed'
            "#,
        )
        .bind(id.owner_id)
        .bind(id.id)
        .bind(desired.name())
        .bind(state_names(expected))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cas_complete(
        &self,
        id: &JobId,
        success: bool,
        message: Option<String>,
        expected: &[JobState],
    ) -> JobsResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE solar_jobs SET
                state = 'Completed', success = $3, message = $4, modified = now(), completed = now()
            WHERE owner_id = $1 AND id = $2 AND state = ANY($5) AND state <> 'Completed'
            "#,
        )
        .bind(id.owner_id)
        .bind(id.id)
        .bind(success)
        .bind(message)
        .bind(state_names(expected))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cas_stale_state(
        &self,
        expected: JobState,
        older_than: DateTime<Utc>,
        new_state: JobState,
    ) -> JobsResult<u64> {
        if expected.is_terminal() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE solar_jobs SET state = $1, modified = now()
            WHERE state = $2 AND modified < $3
            "#,
        )
        .bind(new_state.name())
        .bind(expected.name())
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn update_progress(&self, id: &JobId, percent_complete: f64, result_count: i64) -> JobsResult<()> {
        sqlx::query(
            r#"
            UPDATE solar_jobs SET
                percent_complete = GREATEST(percent_complete, $3),
                result_count = GREATEST(result_count, $4),
                modified = now()
            WHERE owner_id = $1 AND id = $2 AND state = 'Executing'
            "#,
        )
        .bind(id.owner_id)
        .bind(id.id)
        .bind(percent_complete.clamp(0.0, 1.0))
        .bind(result_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &JobId) -> JobsResult<Option<JobRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM solar_jobs WHERE owner_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.owner_id)
            .bind(id.id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn save(&self, record: &JobRecord) -> JobsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO solar_jobs (owner_id, id, job_type, state, configuration, percent_complete,
                                    result_count, success, message, created, modified, started, completed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (owner_id, id) DO UPDATE SET
                job_type = EXCLUDED.job_type,
                state = EXCLUDED.state,
                configuration = EXCLUDED.configuration,
                percent_complete = EXCLUDED.percent_complete,
                result_count = EXCLUDED.result_count,
                success = EXCLUDED.success,
                message = EXCLUDED.message,
                modified = EXCLUDED.modified,
                started = EXCLUDED.started,
                completed = EXCLUDED.completed
            "#,
        )
        .bind(record.id.owner_id)
        .bind(record.id.id)
        .bind(&record.job_type)
        .bind(record.state.name())
        .bind(&record.configuration)
        .bind(record.percent_complete)
        .bind(record.result_count)
        .bind(record.success)
        .bind(&record.message)
        .bind(record.created)
        .bind(record.modified)
        .bind(record.started)
        .bind(record.completed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_completed_older_than(&self, older_than: DateTime<Utc>) -> JobsResult<u64> {
        let result = sqlx::query("DELETE FROM solar_jobs WHERE state = 'Completed' AND completed < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_for_owner(&self, owner_id: i64, state: Option<JobState>) -> JobsResult<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM solar_jobs \
             WHERE owner_id = $1 AND ($2::TEXT IS NULL OR state = $2) \
             ORDER BY created, id"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(owner_id)
            .bind(state.map(|s| s.name()))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }
}
