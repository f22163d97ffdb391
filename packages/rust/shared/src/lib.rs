//! Shared types, error model, and configuration for Tailor.
//!
//! This crate is the foundation depended on by all other Tailor crates.
//! It provides:
//! - [`TailorError`] — the unified error type
//! - Job domain types ([`JobRecord`], [`Stage`], [`EvaluationReport`], [`JobId`])
//! - Document schemas ([`JobDescription`], [`ResumeDocument`], [`EvidenceChunk`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod docs;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, EndpointsConfig, EvaluationConfig, HousekeepingConfig,
    QualityGateConfig, RetryConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_endpoints,
};
pub use docs::{
    ChangeLogEntry, Competency, EvidenceChunk, ExperienceRole, JdMeta, JobDescription, Project,
    ResumeDocument, ResumeMeta, SkillMention,
};
pub use error::{Result, TailorError};
pub use types::{
    ArtifactKeys, ErrorClass, EvaluationReport, FailureReason, FeedbackRecord, JobId, JobRecord,
    JobStatus, JobSummary, Stage, StageExecutionRecord, StageExecutionStatus,
};
