//! libSQL job store — the tenant-scoped source of truth for orchestration.
//!
//! The [`JobStore`] struct wraps a libSQL database holding job state, stage
//! execution history, the artifact registry, and reviewer feedback.
//!
//! **Concurrency rules:**
//! - Every job mutation goes through an optimistic check on the row's
//!   `version`; a lost check surfaces as [`TailorError::Conflict`] and the
//!   writer re-reads instead of blind-writing.
//! - Stage execution rows are insert-once per `(job, stage, cycle, attempt)`
//!   and immutable after reaching a terminal status.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::debug;

use tailor_shared::{
    ArtifactKeys, ErrorClass, FailureReason, FeedbackRecord, JobId, JobRecord, JobStatus, Result,
    Stage, StageExecutionRecord, StageExecutionStatus, TailorError,
};

/// Primary storage handle wrapping a libSQL database.
pub struct JobStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

/// One row of the artifact registry.
#[derive(Debug, Clone)]
pub struct ArtifactRow {
    pub tenant_id: String,
    pub job_id: JobId,
    pub kind: String,
    pub object_key: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub deleted: bool,
}

impl JobStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TailorError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    TailorError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert a newly created job row at version 0.
    pub async fn insert_job(&self, job: &JobRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO jobs (tenant_id, job_id, stage, status, failure_reason,
                     gap_fill_cycles, cancel_requested, jd_ref, resume_ref,
                     artifacts_json, report_json, version, created_at, updated_at,
                     expires_at, tombstoned)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    job.tenant_id.as_str(),
                    job.job_id.to_string(),
                    job.stage.as_str(),
                    job.status.as_str(),
                    job.failure_reason.map(|r| r.as_str()),
                    i64::from(job.gap_fill_cycles),
                    job.cancel_requested as i64,
                    job.jd_ref.as_str(),
                    job.resume_ref.as_str(),
                    artifacts_json(job)?,
                    job.report_json.as_deref(),
                    job.version,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                    job.expires_at.to_rfc3339(),
                    job.tombstoned as i64,
                ],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a job by tenant and id.
    pub async fn get_job(&self, tenant_id: &str, job_id: JobId) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tenant_id, job_id, stage, status, failure_reason, gap_fill_cycles,
                        cancel_requested, jd_ref, resume_ref, artifacts_json, report_json,
                        version, created_at, updated_at, expires_at, tombstoned
                 FROM jobs WHERE tenant_id = ?1 AND job_id = ?2",
                params![tenant_id, job_id.to_string()],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(TailorError::Storage(e.to_string())),
        }
    }

    /// Commit a job mutation under the optimistic version check.
    ///
    /// `job.version` must be the version the caller read; on success the row
    /// carries `version + 1` and the returned value is that new version. A
    /// concurrent writer winning the race surfaces as a `Conflict`.
    pub async fn update_job(&self, job: &JobRecord) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .execute(
                "UPDATE jobs SET stage = ?1, status = ?2, failure_reason = ?3,
                        gap_fill_cycles = ?4, cancel_requested = ?5, artifacts_json = ?6,
                        report_json = ?7, version = version + 1, updated_at = ?8,
                        expires_at = ?9, tombstoned = ?10
                 WHERE tenant_id = ?11 AND job_id = ?12 AND version = ?13",
                params![
                    job.stage.as_str(),
                    job.status.as_str(),
                    job.failure_reason.map(|r| r.as_str()),
                    i64::from(job.gap_fill_cycles),
                    job.cancel_requested as i64,
                    artifacts_json(job)?,
                    job.report_json.as_deref(),
                    now.as_str(),
                    job.expires_at.to_rfc3339(),
                    job.tombstoned as i64,
                    job.tenant_id.as_str(),
                    job.job_id.to_string(),
                    job.version,
                ],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        if affected == 0 {
            return Err(TailorError::conflict(format!(
                "job {}/{} version {} was not current",
                job.tenant_id, job.job_id, job.version
            )));
        }
        Ok(job.version + 1)
    }

    /// Request cancellation. Sets the flag and bumps the version so in-flight
    /// optimistic writers lose their check and re-read the flag.
    pub async fn request_cancel(&self, tenant_id: &str, job_id: JobId) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .execute(
                "UPDATE jobs SET cancel_requested = 1, version = version + 1, updated_at = ?1
                 WHERE tenant_id = ?2 AND job_id = ?3
                   AND status IN ('PENDING', 'RUNNING')",
                params![now.as_str(), tenant_id, job_id.to_string()],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// Non-terminal jobs untouched since `idle_cutoff`, oldest first.
    pub async fn list_stuck_jobs(&self, idle_cutoff: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tenant_id, job_id, stage, status, failure_reason, gap_fill_cycles,
                        cancel_requested, jd_ref, resume_ref, artifacts_json, report_json,
                        version, created_at, updated_at, expires_at, tombstoned
                 FROM jobs
                 WHERE status IN ('PENDING', 'RUNNING') AND tombstoned = 0 AND updated_at < ?1
                 ORDER BY updated_at",
                params![idle_cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    /// Succeeded jobs whose artifacts expired before `now`.
    pub async fn list_expired_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tenant_id, job_id, stage, status, failure_reason, gap_fill_cycles,
                        cancel_requested, jd_ref, resume_ref, artifacts_json, report_json,
                        version, created_at, updated_at, expires_at, tombstoned
                 FROM jobs
                 WHERE status = 'SUCCEEDED' AND tombstoned = 0 AND expires_at < ?1
                 ORDER BY expires_at",
                params![now.to_rfc3339()],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    // -----------------------------------------------------------------------
    // Stage executions
    // -----------------------------------------------------------------------

    /// Record the start of a stage attempt.
    ///
    /// Insert-once: re-dispatching the same `(job, stage, cycle, attempt)`
    /// returns `false` and leaves the existing row untouched.
    pub async fn begin_stage_execution(&self, execution: &StageExecutionRecord) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO stage_executions
                     (tenant_id, job_id, stage, cycle, attempt, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    execution.tenant_id.as_str(),
                    execution.job_id.to_string(),
                    execution.stage.as_str(),
                    i64::from(execution.cycle),
                    i64::from(execution.attempt),
                    execution.status.as_str(),
                    execution.started_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// Finalize a stage attempt. Only a RUNNING row can be finalized — rows
    /// are immutable once terminal.
    #[allow(clippy::too_many_arguments)]
    pub async fn finish_stage_execution(
        &self,
        tenant_id: &str,
        job_id: JobId,
        stage: Stage,
        cycle: u32,
        attempt: u32,
        status: StageExecutionStatus,
        error_class: Option<ErrorClass>,
        error_message: Option<&str>,
        output_json: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .execute(
                "UPDATE stage_executions
                 SET status = ?1, error_class = ?2, error_message = ?3, output_json = ?4,
                     finished_at = ?5
                 WHERE tenant_id = ?6 AND job_id = ?7 AND stage = ?8 AND cycle = ?9
                   AND attempt = ?10 AND status = 'RUNNING'",
                params![
                    status.as_str(),
                    error_class.map(|c| match c {
                        ErrorClass::Transient => "transient",
                        ErrorClass::Terminal => "terminal",
                    }),
                    error_message,
                    output_json,
                    now.as_str(),
                    tenant_id,
                    job_id.to_string(),
                    stage.as_str(),
                    i64::from(cycle),
                    i64::from(attempt),
                ],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        if affected == 0 {
            return Err(TailorError::job_state(format!(
                "stage execution {tenant_id}/{job_id}/{stage} cycle {cycle} attempt {attempt} \
                 is not running"
            )));
        }
        Ok(())
    }

    /// Stored output of a completed `(job, stage, cycle)`, if any.
    ///
    /// This is what makes re-dispatch idempotent: a stage that already
    /// succeeded short-circuits to its recorded result.
    pub async fn get_stage_result(
        &self,
        tenant_id: &str,
        job_id: JobId,
        stage: Stage,
        cycle: u32,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT output_json FROM stage_executions
                 WHERE tenant_id = ?1 AND job_id = ?2 AND stage = ?3 AND cycle = ?4
                   AND status = 'SUCCEEDED'
                 ORDER BY attempt DESC LIMIT 1",
                params![tenant_id, job_id.to_string(), stage.as_str(), i64::from(cycle)],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(TailorError::Storage(e.to_string())),
        }
    }

    /// Highest attempt number recorded for `(job, stage, cycle)`, or 0.
    pub async fn last_attempt(
        &self,
        tenant_id: &str,
        job_id: JobId,
        stage: Stage,
        cycle: u32,
    ) -> Result<u32> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(attempt) FROM stage_executions
                 WHERE tenant_id = ?1 AND job_id = ?2 AND stage = ?3 AND cycle = ?4",
                params![tenant_id, job_id.to_string(), stage.as_str(), i64::from(cycle)],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<u32>(0).unwrap_or(0)),
            _ => Ok(0),
        }
    }

    /// Full execution history for a job, in dispatch order.
    pub async fn list_stage_executions(
        &self,
        tenant_id: &str,
        job_id: JobId,
    ) -> Result<Vec<StageExecutionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tenant_id, job_id, stage, cycle, attempt, status, error_class,
                        error_message, started_at, finished_at
                 FROM stage_executions
                 WHERE tenant_id = ?1 AND job_id = ?2
                 ORDER BY started_at, stage, cycle, attempt",
                params![tenant_id, job_id.to_string()],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let mut executions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            executions.push(row_to_execution(&row)?);
        }
        Ok(executions)
    }

    // -----------------------------------------------------------------------
    // Persist (atomic outcome commit)
    // -----------------------------------------------------------------------

    /// Commit the terminal success of a job: artifact registry rows plus the
    /// job row (stage DONE, artifacts, report) in one transaction. Either
    /// everything lands or the job stays at its pre-persist state.
    pub async fn persist_outcome(
        &self,
        job: &JobRecord,
        keys: &ArtifactKeys,
        hashes: &[(&str, String)],
        report_json: &str,
    ) -> Result<i64> {
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        for (kind, object_key) in keys.entries() {
            let content_hash = hashes
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, hash)| hash.as_str())
                .unwrap_or_default();
            tx.execute(
                "INSERT OR REPLACE INTO artifacts
                     (tenant_id, job_id, kind, object_key, content_hash, created_at,
                      expires_at, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
                params![
                    job.tenant_id.as_str(),
                    job.job_id.to_string(),
                    kind,
                    object_key,
                    content_hash,
                    now.as_str(),
                    job.expires_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;
        }

        let artifacts = serde_json::to_string(keys)
            .map_err(|e| TailorError::Storage(format!("artifact keys: {e}")))?;
        let affected = tx
            .execute(
                "UPDATE jobs SET stage = 'DONE', status = 'SUCCEEDED', artifacts_json = ?1,
                        report_json = ?2, version = version + 1, updated_at = ?3
                 WHERE tenant_id = ?4 AND job_id = ?5 AND version = ?6",
                params![
                    artifacts.as_str(),
                    report_json,
                    now.as_str(),
                    job.tenant_id.as_str(),
                    job.job_id.to_string(),
                    job.version,
                ],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        if affected == 0 {
            tx.rollback()
                .await
                .map_err(|e| TailorError::Storage(e.to_string()))?;
            return Err(TailorError::conflict(format!(
                "persist lost the version check for job {}/{}",
                job.tenant_id, job.job_id
            )));
        }

        tx.commit()
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;
        debug!(tenant_id = %job.tenant_id, job_id = %job.job_id, "persisted job outcome");
        Ok(job.version + 1)
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// Artifact registry rows for one job (including deleted ones).
    pub async fn get_artifacts(&self, tenant_id: &str, job_id: JobId) -> Result<Vec<ArtifactRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tenant_id, job_id, kind, object_key, content_hash, created_at,
                        expires_at, deleted
                 FROM artifacts WHERE tenant_id = ?1 AND job_id = ?2 ORDER BY kind",
                params![tenant_id, job_id.to_string()],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let mut artifacts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            artifacts.push(row_to_artifact(&row)?);
        }
        Ok(artifacts)
    }

    /// All live artifacts for a tenant.
    pub async fn list_artifacts(&self, tenant_id: &str) -> Result<Vec<ArtifactRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tenant_id, job_id, kind, object_key, content_hash, created_at,
                        expires_at, deleted
                 FROM artifacts WHERE tenant_id = ?1 AND deleted = 0 ORDER BY job_id, kind",
                params![tenant_id],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let mut artifacts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            artifacts.push(row_to_artifact(&row)?);
        }
        Ok(artifacts)
    }

    /// Tombstone all artifacts of a job (the bytes are deleted by the
    /// object-store collaborator).
    pub async fn mark_artifacts_deleted(&self, tenant_id: &str, job_id: JobId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE artifacts SET deleted = 1 WHERE tenant_id = ?1 AND job_id = ?2",
                params![tenant_id, job_id.to_string()],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Feedback
    // -----------------------------------------------------------------------

    /// Insert a reviewer feedback record.
    pub async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO feedback (tenant_id, feedback_id, job_id, text, score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    feedback.tenant_id.as_str(),
                    feedback.feedback_id.as_str(),
                    feedback.job_id.to_string(),
                    feedback.text.as_str(),
                    feedback.score,
                    feedback.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Feedback linked to one job, newest first.
    pub async fn list_feedback(
        &self,
        tenant_id: &str,
        job_id: JobId,
    ) -> Result<Vec<FeedbackRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT tenant_id, feedback_id, job_id, text, score, created_at
                 FROM feedback WHERE tenant_id = ?1 AND job_id = ?2
                 ORDER BY created_at DESC",
                params![tenant_id, job_id.to_string()],
            )
            .await
            .map_err(|e| TailorError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(FeedbackRecord {
                tenant_id: get_str(&row, 0)?,
                feedback_id: get_str(&row, 1)?,
                job_id: parse_job_id(&get_str(&row, 2)?)?,
                text: get_str(&row, 3)?,
                score: row.get::<f64>(4).unwrap_or(0.0),
                created_at: parse_ts(&get_str(&row, 5)?)?,
            });
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn artifacts_json(job: &JobRecord) -> Result<Option<String>> {
    job.artifacts
        .as_ref()
        .map(|keys| {
            serde_json::to_string(keys)
                .map_err(|e| TailorError::Storage(format!("artifact keys: {e}")))
        })
        .transpose()
}

fn get_str(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| TailorError::Storage(e.to_string()))
}

fn parse_job_id(s: &str) -> Result<JobId> {
    s.parse()
        .map_err(|e| TailorError::Storage(format!("invalid job id '{s}': {e}")))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TailorError::Storage(format!("invalid timestamp '{s}': {e}")))
}

fn row_to_job(row: &libsql::Row) -> Result<JobRecord> {
    let stage: Stage = get_str(row, 2)?
        .parse()
        .map_err(|e: String| TailorError::Storage(e))?;
    let status: JobStatus = get_str(row, 3)?
        .parse()
        .map_err(|e: String| TailorError::Storage(e))?;
    let failure_reason = row
        .get::<String>(4)
        .ok()
        .map(|s| s.parse::<FailureReason>())
        .transpose()
        .map_err(TailorError::Storage)?;
    let artifacts = row
        .get::<String>(9)
        .ok()
        .map(|json| {
            serde_json::from_str::<ArtifactKeys>(&json)
                .map_err(|e| TailorError::Storage(format!("artifact keys: {e}")))
        })
        .transpose()?;

    Ok(JobRecord {
        tenant_id: get_str(row, 0)?,
        job_id: parse_job_id(&get_str(row, 1)?)?,
        stage,
        status,
        failure_reason,
        gap_fill_cycles: row.get::<u32>(5).unwrap_or(0),
        cancel_requested: row.get::<i64>(6).unwrap_or(0) != 0,
        jd_ref: get_str(row, 7)?,
        resume_ref: get_str(row, 8)?,
        artifacts,
        report_json: row.get::<String>(10).ok(),
        version: row
            .get::<i64>(11)
            .map_err(|e| TailorError::Storage(e.to_string()))?,
        created_at: parse_ts(&get_str(row, 12)?)?,
        updated_at: parse_ts(&get_str(row, 13)?)?,
        expires_at: parse_ts(&get_str(row, 14)?)?,
        tombstoned: row.get::<i64>(15).unwrap_or(0) != 0,
    })
}

fn row_to_execution(row: &libsql::Row) -> Result<StageExecutionRecord> {
    let status = match get_str(row, 5)?.as_str() {
        "RUNNING" => StageExecutionStatus::Running,
        "SUCCEEDED" => StageExecutionStatus::Succeeded,
        "FAILED" => StageExecutionStatus::Failed,
        other => {
            return Err(TailorError::Storage(format!(
                "unknown stage execution status '{other}'"
            )));
        }
    };
    let error_class = match row.get::<String>(6).ok().as_deref() {
        Some("transient") => Some(ErrorClass::Transient),
        Some("terminal") => Some(ErrorClass::Terminal),
        _ => None,
    };

    Ok(StageExecutionRecord {
        tenant_id: get_str(row, 0)?,
        job_id: parse_job_id(&get_str(row, 1)?)?,
        stage: get_str(row, 2)?
            .parse()
            .map_err(|e: String| TailorError::Storage(e))?,
        cycle: row.get::<u32>(3).unwrap_or(0),
        attempt: row.get::<u32>(4).unwrap_or(0),
        status,
        error_class,
        error_message: row.get::<String>(7).ok(),
        started_at: parse_ts(&get_str(row, 8)?)?,
        finished_at: row
            .get::<String>(9)
            .ok()
            .map(|s| parse_ts(&s))
            .transpose()?,
    })
}

fn row_to_artifact(row: &libsql::Row) -> Result<ArtifactRow> {
    Ok(ArtifactRow {
        tenant_id: get_str(row, 0)?,
        job_id: parse_job_id(&get_str(row, 1)?)?,
        kind: get_str(row, 2)?,
        object_key: get_str(row, 3)?,
        content_hash: get_str(row, 4)?,
        created_at: parse_ts(&get_str(row, 5)?)?,
        expires_at: parse_ts(&get_str(row, 6)?)?,
        deleted: row.get::<i64>(7).unwrap_or(0) != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> JobStore {
        let tmp = std::env::temp_dir().join(format!("tailor_test_{}.db", Uuid::now_v7()));
        JobStore::open(&tmp).await.expect("open test db")
    }

    fn test_job(tenant: &str) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            tenant_id: tenant.into(),
            job_id: JobId::new(),
            stage: Stage::Intake,
            status: JobStatus::Pending,
            failure_reason: None,
            gap_fill_cycles: 0,
            cancel_requested: false,
            jd_ref: "tenant-a/jd/input.txt".into(),
            resume_ref: "tenant-a/resume/input.txt".into(),
            artifacts: None,
            report_json: None,
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::days(7),
            tombstoned: false,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("tailor_test_{}.db", Uuid::now_v7()));
        let s1 = JobStore::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = JobStore::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn job_roundtrip() {
        let store = test_store().await;
        let job = test_job("tenant-a");
        store.insert_job(&job).await.expect("insert job");

        let found = store
            .get_job("tenant-a", job.job_id)
            .await
            .expect("get job")
            .expect("job exists");
        assert_eq!(found.stage, Stage::Intake);
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.version, 0);
        assert_eq!(found.jd_ref, "tenant-a/jd/input.txt");
    }

    #[tokio::test]
    async fn tenant_scoping_isolates_jobs() {
        let store = test_store().await;
        let job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();

        let other = store.get_job("tenant-b", job.job_id).await.expect("query");
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn optimistic_update_detects_conflicts() {
        let store = test_store().await;
        let mut job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();

        job.stage = Stage::Parse;
        job.status = JobStatus::Running;
        let new_version = store.update_job(&job).await.expect("first update");
        assert_eq!(new_version, 1);

        // Second writer still holding version 0 must lose.
        let stale = test_job("tenant-a");
        let mut stale = JobRecord {
            job_id: job.job_id,
            ..stale
        };
        stale.stage = Stage::Embed;
        let err = store.update_job(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let current = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.stage, Stage::Parse);
        assert_eq!(current.version, 1);
    }

    #[tokio::test]
    async fn cancel_request_bumps_version() {
        let store = test_store().await;
        let job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();

        assert!(store.request_cancel("tenant-a", job.job_id).await.unwrap());
        let current = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert!(current.cancel_requested);
        assert_eq!(current.version, 1);

        // Terminal jobs cannot be cancelled.
        let mut done = current.clone();
        done.status = JobStatus::Failed;
        store.update_job(&done).await.unwrap();
        assert!(!store.request_cancel("tenant-a", job.job_id).await.unwrap());
    }

    #[tokio::test]
    async fn stage_execution_insert_once() {
        let store = test_store().await;
        let job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();

        let execution = StageExecutionRecord {
            tenant_id: "tenant-a".into(),
            job_id: job.job_id,
            stage: Stage::Parse,
            cycle: 0,
            attempt: 1,
            status: StageExecutionStatus::Running,
            error_class: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        };

        assert!(store.begin_stage_execution(&execution).await.unwrap());
        // Duplicate dispatch of the same attempt is a no-op.
        assert!(!store.begin_stage_execution(&execution).await.unwrap());

        let executions = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
    }

    #[tokio::test]
    async fn finished_executions_are_immutable() {
        let store = test_store().await;
        let job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();

        let execution = StageExecutionRecord {
            tenant_id: "tenant-a".into(),
            job_id: job.job_id,
            stage: Stage::Embed,
            cycle: 0,
            attempt: 1,
            status: StageExecutionStatus::Running,
            error_class: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        store.begin_stage_execution(&execution).await.unwrap();

        store
            .finish_stage_execution(
                "tenant-a",
                job.job_id,
                Stage::Embed,
                0,
                1,
                StageExecutionStatus::Succeeded,
                None,
                None,
                Some(r#"{"vectors":[],"dimension":0}"#),
            )
            .await
            .expect("finish");

        // Finalizing again must fail: the row is terminal.
        let err = store
            .finish_stage_execution(
                "tenant-a",
                job.job_id,
                Stage::Embed,
                0,
                1,
                StageExecutionStatus::Failed,
                Some(ErrorClass::Terminal),
                Some("late failure"),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not running"));

        let result = store
            .get_stage_result("tenant-a", job.job_id, Stage::Embed, 0)
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some(r#"{"vectors":[],"dimension":0}"#));
    }

    #[tokio::test]
    async fn stage_results_are_cycle_scoped() {
        let store = test_store().await;
        let job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();

        let execution = StageExecutionRecord {
            tenant_id: "tenant-a".into(),
            job_id: job.job_id,
            stage: Stage::Generate,
            cycle: 0,
            attempt: 1,
            status: StageExecutionStatus::Running,
            error_class: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        store.begin_stage_execution(&execution).await.unwrap();
        store
            .finish_stage_execution(
                "tenant-a",
                job.job_id,
                Stage::Generate,
                0,
                1,
                StageExecutionStatus::Succeeded,
                None,
                None,
                Some(r#"{"pass":0}"#),
            )
            .await
            .unwrap();

        // Gap-fill re-entry runs in cycle 1 and must not see cycle 0's result.
        assert!(
            store
                .get_stage_result("tenant-a", job.job_id, Stage::Generate, 1)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            store
                .last_attempt("tenant-a", job.job_id, Stage::Generate, 0)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn persist_outcome_is_atomic() {
        let store = test_store().await;
        let mut job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();
        job.stage = Stage::Render;
        job.status = JobStatus::Running;
        store.update_job(&job).await.unwrap();
        // Re-read for the current version.
        let job = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();

        let keys = ArtifactKeys {
            docx_key: "tenant-a/job/1/tailored_resume.docx".into(),
            pdf_key: "tenant-a/job/1/tailored_resume.pdf".into(),
            change_log_key: "tenant-a/job/1/change_log.json".into(),
            report_key: "tenant-a/job/1/evaluation_report.json".into(),
        };
        let hashes = vec![("docx", "abc".to_string()), ("pdf", "def".to_string())];

        store
            .persist_outcome(&job, &keys, &hashes, r#"{"jdCoverage":1.0}"#)
            .await
            .expect("persist");

        let done = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.stage, Stage::Done);
        assert_eq!(done.status, JobStatus::Succeeded);
        assert!(done.report_json.unwrap().contains("jdCoverage"));

        let artifacts = store.get_artifacts("tenant-a", job.job_id).await.unwrap();
        assert_eq!(artifacts.len(), 4);

        // A stale persist must conflict and change nothing.
        let err = store
            .persist_outcome(&job, &keys, &hashes, "{}")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn stuck_and_expired_sweeps() {
        let store = test_store().await;
        let job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();

        let stuck = store
            .list_stuck_jobs(Utc::now() + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);

        // Terminal jobs never count as stuck.
        let mut failed = stuck[0].clone();
        failed.status = JobStatus::Failed;
        failed.failure_reason = Some(FailureReason::Timeout);
        store.update_job(&failed).await.unwrap();
        assert!(
            store
                .list_stuck_jobs(Utc::now() + Duration::seconds(5))
                .await
                .unwrap()
                .is_empty()
        );

        // Expiry sweep sees only succeeded jobs past their TTL.
        let mut done = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();
        done.status = JobStatus::Succeeded;
        done.stage = Stage::Done;
        done.expires_at = Utc::now() - Duration::days(1);
        store.update_job(&done).await.unwrap();

        let expired = store.list_expired_jobs(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
    }

    #[tokio::test]
    async fn feedback_roundtrip() {
        let store = test_store().await;
        let job = test_job("tenant-a");
        store.insert_job(&job).await.unwrap();

        let feedback = FeedbackRecord {
            tenant_id: "tenant-a".into(),
            feedback_id: format!("{}#1", job.job_id),
            job_id: job.job_id,
            text: "Lead with the migration project.".into(),
            score: 0.9,
            created_at: Utc::now(),
        };
        store.insert_feedback(&feedback).await.expect("insert");

        let records = store.list_feedback("tenant-a", job.job_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, 0.9);
        assert!(
            store
                .list_feedback("tenant-b", job.job_id)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
