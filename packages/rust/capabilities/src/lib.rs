//! Capability adapter contracts for the tailoring pipeline.
//!
//! Each remote stage (parse, embed, retrieve, generate, render) is reached
//! through one typed request/response trait. Concrete providers live behind
//! these seams — the orchestrator never sees transport details, and tests
//! substitute in-memory fakes. [`http`] ships the one bundled implementation.

pub mod http;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tailor_shared::{
    ChangeLogEntry, EvidenceChunk, FailureReason, JobDescription, ResumeDocument, SkillMention,
    Stage,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure signal from a capability provider.
///
/// Terminal variants carry the per-stage failure signals of the adapter
/// contracts; `Throttled`/`Unavailable` are the transient class retried by
/// the stage executor.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("unreadable document: {0}")]
    UnreadableDocument(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("generation blocked: {0}")]
    GenerationBlocked(String),

    #[error("render failed: {0}")]
    RenderFailed(String),

    /// Provider asked us to back off (429/408-equivalent).
    #[error("throttled: {0}")]
    Throttled(String),

    /// Provider-side fault (5xx-equivalent, connection failures).
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    /// Whether the stage executor should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Unavailable(_))
    }

    /// The job failure reason for a terminal capability error.
    ///
    /// Transient variants fall back to the owning stage's signal via
    /// [`stage_failure_reason`].
    pub fn failure_reason(&self, stage: Stage) -> FailureReason {
        match self {
            Self::UnreadableDocument(_) => FailureReason::UnreadableDocument,
            Self::EmbeddingUnavailable(_) => FailureReason::EmbeddingUnavailable,
            Self::IndexUnavailable(_) => FailureReason::IndexUnavailable,
            Self::GenerationBlocked(_) => FailureReason::GenerationBlocked,
            Self::RenderFailed(_) => FailureReason::RenderFailed,
            Self::Throttled(_) | Self::Unavailable(_) => stage_failure_reason(stage),
        }
    }
}

/// The failure signal a stage reports when its provider stays unreachable.
pub fn stage_failure_reason(stage: Stage) -> FailureReason {
    match stage {
        Stage::Parse => FailureReason::UnreadableDocument,
        Stage::Embed => FailureReason::EmbeddingUnavailable,
        Stage::Retrieve => FailureReason::IndexUnavailable,
        Stage::Generate => FailureReason::GenerationBlocked,
        Stage::Render => FailureReason::RenderFailed,
        // Stages without a remote capability time out at the job level.
        _ => FailureReason::Timeout,
    }
}

/// Result alias for capability calls.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Raw document bytes plus the declared type ("plain-text", "pdf", "docx").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPayload {
    #[serde(with = "b64")]
    pub bytes: Vec<u8>,
    pub document_type: String,
}

impl DocumentPayload {
    pub fn plain_text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            document_type: "plain-text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub job_description: DocumentPayload,
    pub base_resume: DocumentPayload,
    #[serde(default)]
    pub validated_resumes: Vec<DocumentPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOutput {
    pub job_description: JobDescription,
    pub base_resume: ResumeDocument,
    #[serde(default)]
    pub validated_resumes: Vec<ResumeDocument>,
    /// Skills aggregated across all parsed inputs, by descending frequency.
    #[serde(default)]
    pub extracted_skills: Vec<SkillMention>,
}

/// OCR/structure extraction over raw documents.
#[async_trait]
pub trait ParseCapability: Send + Sync {
    async fn parse(&self, request: ParseRequest) -> CapabilityResult<ParseOutput>;
}

// ---------------------------------------------------------------------------
// Embed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedOutput {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    pub dimension: usize,
}

/// Text embedding.
#[async_trait]
pub trait EmbedCapability: Send + Sync {
    async fn embed(&self, request: EmbedRequest) -> CapabilityResult<EmbedOutput>;
}

// ---------------------------------------------------------------------------
// Retrieve
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveRequest {
    /// Tenant scope — providers must never return cross-tenant evidence.
    pub tenant_id: String,
    pub query_vectors: Vec<Vec<f32>>,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveOutput {
    /// Ranked evidence snippets, best first.
    pub chunks: Vec<EvidenceChunk>,
}

/// Vector-index search over tenant evidence.
#[async_trait]
pub trait RetrieveCapability: Send + Sync {
    async fn retrieve(&self, request: RetrieveRequest) -> CapabilityResult<RetrieveOutput>;
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// Re-generation seed built from the previous cycle's evaluation gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapFillDirective {
    pub missing_targets: Vec<String>,
    pub missing_keywords: Vec<String>,
    /// Which gap-fill cycle this directive seeds (1-based).
    pub cycle: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationDirectives {
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_fill: Option<GapFillDirective>,
}

fn default_tone() -> String {
    "professional".into()
}

impl Default for GenerationDirectives {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            keywords: Vec::new(),
            gap_fill: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub job_description: JobDescription,
    pub base_resume: ResumeDocument,
    #[serde(default)]
    pub validated_resumes: Vec<ResumeDocument>,
    pub evidence: Vec<EvidenceChunk>,
    pub directives: GenerationDirectives,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOutput {
    pub document: ResumeDocument,
    #[serde(default)]
    pub change_log: Vec<ChangeLogEntry>,
}

/// Candidate document generation.
#[async_trait]
pub trait GenerateCapability: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> CapabilityResult<GenerateOutput>;
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub document: ResumeDocument,
    #[serde(default)]
    pub change_log: Vec<ChangeLogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    #[serde(with = "b64")]
    pub docx: Vec<u8>,
    #[serde(with = "b64")]
    pub pdf: Vec<u8>,
    #[serde(default)]
    pub change_log: Vec<ChangeLogEntry>,
}

/// Final document rendering (DOCX/PDF).
#[async_trait]
pub trait RenderCapability: Send + Sync {
    async fn render(&self, request: RenderRequest) -> CapabilityResult<RenderOutput>;
}

// ---------------------------------------------------------------------------
// Capability set
// ---------------------------------------------------------------------------

/// The five remote capabilities a pipeline run needs, as shared handles.
#[derive(Clone)]
pub struct CapabilitySet {
    pub parse: Arc<dyn ParseCapability>,
    pub embed: Arc<dyn EmbedCapability>,
    pub retrieve: Arc<dyn RetrieveCapability>,
    pub generate: Arc<dyn GenerateCapability>,
    pub render: Arc<dyn RenderCapability>,
}

/// Convenience constructor for an evidence chunk with metadata.
pub fn evidence_chunk(text: impl Into<String>, score: f64) -> EvidenceChunk {
    EvidenceChunk {
        text: text.into(),
        score,
        metadata: BTreeMap::new(),
    }
}

// ---------------------------------------------------------------------------
// base64 (de)serialization for binary payloads on the JSON wire
// ---------------------------------------------------------------------------

mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
