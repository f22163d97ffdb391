//! SQL migration definitions for the Tailor job store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: jobs, stage_executions, artifacts, feedback",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Job state — source of truth for orchestration.
-- All keys are tenant-prefixed; `version` backs optimistic concurrency.
CREATE TABLE IF NOT EXISTS jobs (
    tenant_id        TEXT NOT NULL,
    job_id           TEXT NOT NULL,
    stage            TEXT NOT NULL,
    status           TEXT NOT NULL,
    failure_reason   TEXT,
    gap_fill_cycles  INTEGER NOT NULL DEFAULT 0,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    jd_ref           TEXT NOT NULL,
    resume_ref       TEXT NOT NULL,
    artifacts_json   TEXT,
    report_json      TEXT,
    version          INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    expires_at       TEXT NOT NULL,
    tombstoned       INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant_id, job_id)
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_at);
CREATE INDEX IF NOT EXISTS idx_jobs_expires ON jobs(expires_at);

-- One row per stage attempt, immutable once terminal.
-- `cycle` is the gap-fill cycle (0 for the first pass).
CREATE TABLE IF NOT EXISTS stage_executions (
    tenant_id     TEXT NOT NULL,
    job_id        TEXT NOT NULL,
    stage         TEXT NOT NULL,
    cycle         INTEGER NOT NULL,
    attempt       INTEGER NOT NULL,
    status        TEXT NOT NULL,
    error_class   TEXT,
    error_message TEXT,
    output_json   TEXT,
    started_at    TEXT NOT NULL,
    finished_at   TEXT,
    PRIMARY KEY (tenant_id, job_id, stage, cycle, attempt)
);

CREATE INDEX IF NOT EXISTS idx_stage_executions_job ON stage_executions(tenant_id, job_id);

-- Final artifact registry (object-store keys; bytes live externally).
CREATE TABLE IF NOT EXISTS artifacts (
    tenant_id    TEXT NOT NULL,
    job_id       TEXT NOT NULL,
    kind         TEXT NOT NULL,
    object_key   TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    expires_at   TEXT NOT NULL,
    deleted      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant_id, job_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_artifacts_tenant ON artifacts(tenant_id, deleted);

-- Reviewer feedback, read as retrieval input for future runs.
CREATE TABLE IF NOT EXISTS feedback (
    tenant_id   TEXT NOT NULL,
    feedback_id TEXT NOT NULL,
    job_id      TEXT NOT NULL,
    text        TEXT NOT NULL,
    score       REAL NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (tenant_id, feedback_id)
);

CREATE INDEX IF NOT EXISTS idx_feedback_job ON feedback(tenant_id, job_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
