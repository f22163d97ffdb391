//! Core domain types for Tailor jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stages in fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Intake,
    Parse,
    Embed,
    Retrieve,
    Generate,
    Validate,
    Render,
    Persist,
    Done,
}

impl Stage {
    /// All stages in execution order.
    pub const ORDER: [Stage; 9] = [
        Stage::Intake,
        Stage::Parse,
        Stage::Embed,
        Stage::Retrieve,
        Stage::Generate,
        Stage::Validate,
        Stage::Render,
        Stage::Persist,
        Stage::Done,
    ];

    /// Position in the fixed stage order.
    pub fn ordinal(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).expect("stage in ORDER")
    }

    /// The stage that follows this one, or `None` for `Done`.
    pub fn next(self) -> Option<Stage> {
        Self::ORDER.get(self.ordinal() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intake => "INTAKE",
            Stage::Parse => "PARSE",
            Stage::Embed => "EMBED",
            Stage::Retrieve => "RETRIEVE",
            Stage::Generate => "GENERATE",
            Stage::Validate => "VALIDATE",
            Stage::Render => "RENDER",
            Stage::Persist => "PERSIST",
            Stage::Done => "DONE",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ORDER
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// JobStatus / FailureReason
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            _ => Err(format!("unknown job status '{s}'")),
        }
    }
}

/// Tagged reason attached to a `FAILED` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FailureReason {
    /// Required input artifacts were absent at intake.
    InputMissing,
    /// Parse provider could not read the document.
    UnreadableDocument,
    /// Embedding provider unavailable after retries.
    EmbeddingUnavailable,
    /// Vector index unavailable after retries.
    IndexUnavailable,
    /// Generation rejected by provider policy.
    GenerationBlocked,
    /// Rendering failed terminally.
    RenderFailed,
    /// Quality gate still failing after the gap-fill cycle bound.
    QualityGateExceeded,
    /// Job-level or housekeeper TTL expired.
    Timeout,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::InputMissing => "InputMissing",
            FailureReason::UnreadableDocument => "UnreadableDocument",
            FailureReason::EmbeddingUnavailable => "EmbeddingUnavailable",
            FailureReason::IndexUnavailable => "IndexUnavailable",
            FailureReason::GenerationBlocked => "GenerationBlocked",
            FailureReason::RenderFailed => "RenderFailed",
            FailureReason::QualityGateExceeded => "QualityGateExceeded",
            FailureReason::Timeout => "Timeout",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "InputMissing" => Ok(Self::InputMissing),
            "UnreadableDocument" => Ok(Self::UnreadableDocument),
            "EmbeddingUnavailable" => Ok(Self::EmbeddingUnavailable),
            "IndexUnavailable" => Ok(Self::IndexUnavailable),
            "GenerationBlocked" => Ok(Self::GenerationBlocked),
            "RenderFailed" => Ok(Self::RenderFailed),
            "QualityGateExceeded" => Ok(Self::QualityGateExceeded),
            "Timeout" => Ok(Self::Timeout),
            _ => Err(format!("unknown failure reason '{s}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// Object-store keys for the final artifacts of a succeeded job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactKeys {
    pub docx_key: String,
    pub pdf_key: String,
    pub change_log_key: String,
    pub report_key: String,
}

impl ArtifactKeys {
    /// All keys, paired with their artifact kind label.
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("docx", &self.docx_key),
            ("pdf", &self.pdf_key),
            ("change-log", &self.change_log_key),
            ("evaluation-report", &self.report_key),
        ]
    }
}

/// A persisted job row — the source of truth for orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub tenant_id: String,
    pub job_id: JobId,
    pub stage: Stage,
    pub status: JobStatus,
    pub failure_reason: Option<FailureReason>,
    /// Completed VALIDATE→GENERATE re-entries.
    pub gap_fill_cycles: u32,
    pub cancel_requested: bool,
    /// Object-store reference to the job description input.
    pub jd_ref: String,
    /// Object-store reference to the base resume input.
    pub resume_ref: String,
    pub artifacts: Option<ArtifactKeys>,
    /// Evaluation report JSON, written atomically with the artifacts.
    pub report_json: Option<String>,
    /// Optimistic concurrency token; bumped on every committed mutation.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tombstoned: bool,
}

/// Externally visible job summary (the `getStatus` shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    pub stage: Stage,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub gap_fill_cycles: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_id,
            stage: job.stage,
            status: job.status,
            failure_reason: job.failure_reason,
            gap_fill_cycles: job.gap_fill_cycles,
            updated_at: job.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage executions
// ---------------------------------------------------------------------------

/// Outcome classification for a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Retryable: timeout, throttling, 5xx-equivalent.
    Transient,
    /// Not retryable: malformed input, provider policy rejection.
    Terminal,
}

/// Status of one stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl StageExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageExecutionStatus::Running => "RUNNING",
            StageExecutionStatus::Succeeded => "SUCCEEDED",
            StageExecutionStatus::Failed => "FAILED",
        }
    }
}

/// One attempt of one stage — immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecutionRecord {
    pub tenant_id: String,
    pub job_id: JobId,
    pub stage: Stage,
    /// Gap-fill cycle this attempt belongs to (0 for the first pass).
    pub cycle: u32,
    pub attempt: u32,
    pub status: StageExecutionStatus,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Evaluation report (wire compatibility boundary)
// ---------------------------------------------------------------------------

/// Quality report emitted by the evaluation engine.
///
/// The serialized shape is a compatibility boundary consumed by downstream
/// gating and review tooling; the field set and camelCase names must not
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub jd_coverage: f64,
    pub missing_coverage_targets: Vec<String>,
    pub ats_keyword_score: f64,
    pub missing_ats_keywords: Vec<String>,
    pub hallucinations: Vec<String>,
    pub consistency: f64,
    pub readability_grade_level: f64,
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

/// Reviewer feedback attached to a completed job. Read-only input to
/// retrieval context assembly; written by an external review surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub tenant_id: String,
    pub feedback_id: String,
    pub job_id: JobId,
    pub text: String,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}
