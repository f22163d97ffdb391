//! Job state machine: INTAKE → PARSE → EMBED → RETRIEVE → GENERATE →
//! VALIDATE → RENDER → PERSIST → DONE.
//!
//! The orchestrator owns no in-process job state: every decision starts from
//! a fresh read of the job store and every transition commits under the
//! optimistic version check. Losing a version race means some other writer
//! (another orchestrator run, the housekeeper, a cancel request) got there
//! first — the loop re-reads and continues from whatever they left.
//!
//! VALIDATE runs the evaluation engine in-process and gates the run: below
//! threshold, the job re-enters GENERATE with a gap-fill directive, at most
//! `max_gap_fill_cycles` times. That VALIDATE→GENERATE edge is the only
//! permitted stage regression.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tailor_artifacts::{ObjectStore, content_hash};
use tailor_capabilities::{
    CapabilityError, CapabilitySet, DocumentPayload, EmbedOutput, EmbedRequest, GapFillDirective,
    GenerateOutput, GenerateRequest, GenerationDirectives, ParseOutput, ParseRequest,
    RenderOutput, RenderRequest, RetrieveOutput, RetrieveRequest,
};
use tailor_evaluation::lint::{LintIssue, check_document};
use tailor_shared::{
    AppConfig, ArtifactKeys, ErrorClass, EvaluationConfig, EvaluationReport, EvidenceChunk,
    FailureReason, JobId, JobRecord, JobStatus, QualityGateConfig, Result, Stage,
    StageExecutionRecord, StageExecutionStatus, TailorError,
};
use tailor_storage::JobStore;

use crate::executor::{RetryPolicy, StageExecutor, StageOutcome};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Orchestrator-level tuning, derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub quality_gate: QualityGateConfig,
    pub evaluation: EvaluationConfig,
    /// Wall-clock bound on a job from creation to a terminal state.
    pub job_timeout: Duration,
    /// Artifact retention after success.
    pub artifact_ttl: Duration,
    /// Evidence chunks kept after retrieval dedup.
    pub evidence_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            quality_gate: config.quality_gate.clone(),
            evaluation: config.evaluation.clone(),
            job_timeout: Duration::from_secs(config.defaults.job_timeout_secs),
            artifact_ttl: Duration::from_secs(
                u64::from(config.defaults.artifact_ttl_days) * 86_400,
            ),
            evidence_limit: config.defaults.evidence_limit,
        }
    }
}

// ---------------------------------------------------------------------------
// Validate stage output
// ---------------------------------------------------------------------------

/// Stored output of the VALIDATE stage: the report plus structural lint.
///
/// Only `report` crosses the external wire; lint findings stay operational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub report: EvaluationReport,
    pub lint: Vec<LintIssue>,
    pub passed: bool,
}

/// What the state machine should do after a stage handler returns.
enum Step {
    Advance(Stage),
    GapFill,
    Fail(FailureReason),
    Persisted,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives jobs through the pipeline. Cheap to clone via shared handles.
pub struct Orchestrator {
    store: Arc<JobStore>,
    objects: Arc<dyn ObjectStore>,
    capabilities: CapabilitySet,
    executor: StageExecutor,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        objects: Arc<dyn ObjectStore>,
        capabilities: CapabilitySet,
        policy: RetryPolicy,
        config: OrchestratorConfig,
    ) -> Self {
        let executor = StageExecutor::new(store.clone(), policy);
        Self {
            store,
            objects,
            capabilities,
            executor,
            config,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Create a job at INTAKE/PENDING.
    pub async fn create_job(
        &self,
        tenant_id: &str,
        jd_ref: &str,
        resume_ref: &str,
    ) -> Result<JobRecord> {
        let now = Utc::now();
        let job = JobRecord {
            tenant_id: tenant_id.to_string(),
            job_id: JobId::new(),
            stage: Stage::Intake,
            status: JobStatus::Pending,
            failure_reason: None,
            gap_fill_cycles: 0,
            cancel_requested: false,
            jd_ref: jd_ref.to_string(),
            resume_ref: resume_ref.to_string(),
            artifacts: None,
            report_json: None,
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::seconds(self.config.artifact_ttl.as_secs() as i64),
            tombstoned: false,
        };
        self.store.insert_job(&job).await?;
        info!(tenant_id, job_id = %job.job_id, "job created");
        Ok(job)
    }

    /// Request cooperative cancellation; honored at the next stage boundary.
    pub async fn cancel(&self, tenant_id: &str, job_id: JobId) -> Result<bool> {
        self.store.request_cancel(tenant_id, job_id).await
    }

    /// Drive a job until it reaches a terminal status.
    ///
    /// Safe to call concurrently with the housekeeper or a second run for the
    /// same job: stage execution is idempotent per `(job, stage, cycle,
    /// attempt)` and every state commit is version-checked.
    #[instrument(skip(self), fields(tenant_id, job_id = %job_id))]
    pub async fn run(&self, tenant_id: &str, job_id: JobId) -> Result<JobRecord> {
        loop {
            let mut job = self
                .store
                .get_job(tenant_id, job_id)
                .await?
                .ok_or_else(|| {
                    TailorError::job_state(format!("unknown job {tenant_id}/{job_id}"))
                })?;

            if job.status.is_terminal() || job.tombstoned {
                return Ok(job);
            }

            // Cancellation settles at stage boundaries only.
            if job.cancel_requested {
                job.status = JobStatus::Cancelled;
                if self.commit(&job).await? {
                    info!(job_id = %job.job_id, stage = %job.stage, "job cancelled");
                }
                continue;
            }

            // Job-level timeout, regardless of what any stage is doing.
            let deadline = job.created_at
                + chrono::Duration::seconds(self.config.job_timeout.as_secs() as i64);
            if Utc::now() > deadline {
                job.status = JobStatus::Failed;
                job.failure_reason = Some(FailureReason::Timeout);
                if self.commit(&job).await? {
                    warn!(job_id = %job.job_id, stage = %job.stage, "job exceeded its timeout");
                }
                continue;
            }

            let step = match job.stage {
                Stage::Intake => self.run_intake(&job).await?,
                Stage::Parse => self.run_parse(&job).await?,
                Stage::Embed => self.run_embed(&job).await?,
                Stage::Retrieve => self.run_retrieve(&job).await?,
                Stage::Generate => self.run_generate(&job).await?,
                Stage::Validate => self.run_validate(&job).await?,
                // The RENDER→PERSIST→DONE tail commits atomically; an
                // interrupted persist leaves the job observably in RENDER.
                Stage::Render | Stage::Persist => self.run_render_and_persist(&job).await?,
                Stage::Done => return Ok(job),
            };

            match step {
                Step::Advance(next) => {
                    debug!(job_id = %job.job_id, from = %job.stage, to = %next, "advancing stage");
                    job.stage = next;
                    job.status = JobStatus::Running;
                    self.commit(&job).await?;
                }
                Step::GapFill => {
                    job.gap_fill_cycles += 1;
                    job.stage = Stage::Generate;
                    job.status = JobStatus::Running;
                    if self.commit(&job).await? {
                        info!(
                            job_id = %job.job_id,
                            cycle = job.gap_fill_cycles,
                            "quality gate missed, re-entering GENERATE"
                        );
                    }
                }
                Step::Fail(reason) => {
                    job.status = JobStatus::Failed;
                    job.failure_reason = Some(reason);
                    if self.commit(&job).await? {
                        warn!(job_id = %job.job_id, stage = %job.stage, %reason, "job failed");
                    }
                }
                Step::Persisted => {
                    // The persist transaction already advanced the job row.
                }
            }
        }
    }

    /// Commit a job mutation; `false` means a concurrent writer won and the
    /// caller should re-read.
    async fn commit(&self, job: &JobRecord) -> Result<bool> {
        match self.store.update_job(job).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => {
                debug!(job_id = %job.job_id, "lost a version race, re-reading");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Stage handlers
    // -----------------------------------------------------------------------

    /// INTAKE: both input references must exist in the object store.
    async fn run_intake(&self, job: &JobRecord) -> Result<Step> {
        if self.stage_result_exists(job, Stage::Intake, 0).await? {
            return Ok(Step::Advance(Stage::Parse));
        }

        let attempt = self
            .store
            .last_attempt(&job.tenant_id, job.job_id, Stage::Intake, 0)
            .await?
            + 1;
        self.begin_execution(job, Stage::Intake, 0, attempt).await?;

        let jd_present = self.objects.exists(&job.jd_ref).await?;
        let resume_present = self.objects.exists(&job.resume_ref).await?;

        if jd_present && resume_present {
            let output = serde_json::json!({
                "jdRef": job.jd_ref,
                "resumeRef": job.resume_ref,
            });
            self.store
                .finish_stage_execution(
                    &job.tenant_id,
                    job.job_id,
                    Stage::Intake,
                    0,
                    attempt,
                    StageExecutionStatus::Succeeded,
                    None,
                    None,
                    Some(&output.to_string()),
                )
                .await?;
            Ok(Step::Advance(Stage::Parse))
        } else {
            let message = format!(
                "missing inputs: jd present={jd_present}, resume present={resume_present}"
            );
            self.store
                .finish_stage_execution(
                    &job.tenant_id,
                    job.job_id,
                    Stage::Intake,
                    0,
                    attempt,
                    StageExecutionStatus::Failed,
                    Some(ErrorClass::Terminal),
                    Some(&message),
                    None,
                )
                .await?;
            Ok(Step::Fail(FailureReason::InputMissing))
        }
    }

    /// PARSE: raw bytes → structured JD + resume schemas.
    async fn run_parse(&self, job: &JobRecord) -> Result<Step> {
        let jd_bytes = self.load_input(&job.jd_ref).await?;
        let resume_bytes = self.load_input(&job.resume_ref).await?;
        let request = ParseRequest {
            job_description: payload_for(&job.jd_ref, jd_bytes),
            base_resume: payload_for(&job.resume_ref, resume_bytes),
            validated_resumes: Vec::new(),
        };

        let parse = self.capabilities.parse.clone();
        let outcome = self
            .executor
            .execute(job, Stage::Parse, 0, || {
                let request = request.clone();
                let parse = parse.clone();
                async move { parse.parse(request).await }
            })
            .await?;

        match outcome {
            StageOutcome::Completed(_) => Ok(Step::Advance(Stage::Embed)),
            StageOutcome::Failed(failure) => Ok(Step::Fail(failure.reason)),
        }
    }

    /// EMBED: chunk the parsed documents and embed each chunk.
    async fn run_embed(&self, job: &JobRecord) -> Result<Step> {
        let parsed: ParseOutput = self.stage_output(job, Stage::Parse, 0).await?;
        let texts = embed_texts(&parsed);
        let expected = texts.len();
        let request = EmbedRequest { texts };

        let embed = self.capabilities.embed.clone();
        let outcome = self
            .executor
            .execute(job, Stage::Embed, 0, || {
                let request = request.clone();
                let embed = embed.clone();
                async move {
                    let output = embed.embed(request).await?;
                    if output.vectors.len() != expected {
                        return Err(CapabilityError::EmbeddingUnavailable(format!(
                            "expected {expected} vectors, provider returned {}",
                            output.vectors.len()
                        )));
                    }
                    Ok(output)
                }
            })
            .await?;

        match outcome {
            StageOutcome::Completed(_) => Ok(Step::Advance(Stage::Retrieve)),
            StageOutcome::Failed(failure) => Ok(Step::Fail(failure.reason)),
        }
    }

    /// RETRIEVE: vector search, then merge tenant feedback, dedupe by text
    /// keeping the best score, and keep the top of the ranking.
    async fn run_retrieve(&self, job: &JobRecord) -> Result<Step> {
        let embedding: EmbedOutput = self.stage_output(job, Stage::Embed, 0).await?;
        let request = RetrieveRequest {
            tenant_id: job.tenant_id.clone(),
            query_vectors: embedding.vectors,
            top_k: self.config.evidence_limit,
        };
        let feedback = self
            .store
            .list_feedback(&job.tenant_id, job.job_id)
            .await?;
        let limit = self.config.evidence_limit;

        let retrieve = self.capabilities.retrieve.clone();
        let outcome = self
            .executor
            .execute(job, Stage::Retrieve, 0, || {
                let request = request.clone();
                let retrieve = retrieve.clone();
                let feedback = feedback.clone();
                async move {
                    let output = retrieve.retrieve(request).await?;
                    let mut chunks = output.chunks;
                    for record in &feedback {
                        let mut chunk = EvidenceChunk {
                            text: record.text.clone(),
                            score: record.score,
                            ..Default::default()
                        };
                        chunk
                            .metadata
                            .insert("source".into(), "feedback".into());
                        chunk
                            .metadata
                            .insert("feedbackId".into(), record.feedback_id.clone());
                        chunks.push(chunk);
                    }
                    Ok(RetrieveOutput {
                        chunks: rank_evidence(chunks, limit),
                    })
                }
            })
            .await?;

        match outcome {
            StageOutcome::Completed(_) => Ok(Step::Advance(Stage::Generate)),
            StageOutcome::Failed(failure) => Ok(Step::Fail(failure.reason)),
        }
    }

    /// GENERATE: candidate document from parsed inputs + evidence, seeded
    /// with a gap-fill directive on re-entry.
    async fn run_generate(&self, job: &JobRecord) -> Result<Step> {
        let cycle = job.gap_fill_cycles;
        let parsed: ParseOutput = self.stage_output(job, Stage::Parse, 0).await?;
        let retrieval: RetrieveOutput = self.stage_output(job, Stage::Retrieve, 0).await?;

        let gap_fill = if cycle > 0 {
            let previous: ValidationOutcome =
                self.stage_output(job, Stage::Validate, cycle - 1).await?;
            Some(GapFillDirective {
                missing_targets: previous.report.missing_coverage_targets,
                missing_keywords: previous.report.missing_ats_keywords,
                cycle,
            })
        } else {
            None
        };

        let request = GenerateRequest {
            job_description: parsed.job_description,
            base_resume: parsed.base_resume,
            validated_resumes: parsed.validated_resumes,
            evidence: retrieval.chunks,
            directives: GenerationDirectives {
                keywords: self.config.evaluation.ats_keywords.clone(),
                gap_fill,
                ..Default::default()
            },
        };

        let generate = self.capabilities.generate.clone();
        let outcome = self
            .executor
            .execute(job, Stage::Generate, cycle, || {
                let request = request.clone();
                let generate = generate.clone();
                async move { generate.generate(request).await }
            })
            .await?;

        match outcome {
            StageOutcome::Completed(_) => Ok(Step::Advance(Stage::Validate)),
            StageOutcome::Failed(failure) => Ok(Step::Fail(failure.reason)),
        }
    }

    /// VALIDATE: run the evaluation engine and gate the pipeline. Never
    /// fails as a stage — the outcome decides the next transition.
    async fn run_validate(&self, job: &JobRecord) -> Result<Step> {
        let cycle = job.gap_fill_cycles;

        let outcome: ValidationOutcome = if let Some(json) = self
            .store
            .get_stage_result(&job.tenant_id, job.job_id, Stage::Validate, cycle)
            .await?
        {
            serde_json::from_str(&json).map_err(|e| {
                TailorError::Storage(format!("stored VALIDATE result is unreadable: {e}"))
            })?
        } else {
            let parsed: ParseOutput = self.stage_output(job, Stage::Parse, 0).await?;
            let retrieval: RetrieveOutput = self.stage_output(job, Stage::Retrieve, 0).await?;
            let generation: GenerateOutput =
                self.stage_output(job, Stage::Generate, cycle).await?;

            let report = tailor_evaluation::evaluate(
                &parsed.job_description,
                &generation.document,
                &retrieval.chunks,
                &self.config.evaluation,
            );
            let lint = check_document(
                &generation.document,
                &generation.change_log,
                &self.config.evaluation.banned_claims,
            );
            if !lint.is_empty() {
                debug!(job_id = %job.job_id, findings = lint.len(), "structural lint findings");
            }
            let passed = self.gate_passes(&report);
            let outcome = ValidationOutcome {
                report,
                lint,
                passed,
            };

            let attempt = self
                .store
                .last_attempt(&job.tenant_id, job.job_id, Stage::Validate, cycle)
                .await?
                + 1;
            self.begin_execution(job, Stage::Validate, cycle, attempt)
                .await?;
            let output = serde_json::to_string(&outcome)
                .map_err(|e| TailorError::Storage(format!("VALIDATE output: {e}")))?;
            self.store
                .finish_stage_execution(
                    &job.tenant_id,
                    job.job_id,
                    Stage::Validate,
                    cycle,
                    attempt,
                    StageExecutionStatus::Succeeded,
                    None,
                    None,
                    Some(&output),
                )
                .await?;
            outcome
        };

        if outcome.passed {
            info!(
                job_id = %job.job_id,
                coverage = outcome.report.jd_coverage,
                ats = outcome.report.ats_keyword_score,
                "quality gate passed"
            );
            return Ok(Step::Advance(Stage::Render));
        }

        if cycle < self.config.quality_gate.max_gap_fill_cycles {
            Ok(Step::GapFill)
        } else {
            warn!(
                job_id = %job.job_id,
                cycles = cycle,
                coverage = outcome.report.jd_coverage,
                ats = outcome.report.ats_keyword_score,
                hallucinations = outcome.report.hallucinations.len(),
                "quality gate still failing after the gap-fill bound"
            );
            Ok(Step::Fail(FailureReason::QualityGateExceeded))
        }
    }

    /// RENDER + PERSIST: render the approved document, then commit artifacts
    /// and the report in one store transaction. A failed persist leaves the
    /// job in RENDER; re-dispatch reuses the rendered output.
    async fn run_render_and_persist(&self, job: &JobRecord) -> Result<Step> {
        let cycle = job.gap_fill_cycles;
        let generation: GenerateOutput = self.stage_output(job, Stage::Generate, cycle).await?;
        let request = RenderRequest {
            document: generation.document,
            change_log: generation.change_log,
        };

        let render = self.capabilities.render.clone();
        let outcome = self
            .executor
            .execute(job, Stage::Render, cycle, || {
                let request = request.clone();
                let render = render.clone();
                async move { render.render(request).await }
            })
            .await?;

        let rendered: RenderOutput = match outcome {
            StageOutcome::Completed(rendered) => rendered,
            StageOutcome::Failed(failure) => return Ok(Step::Fail(failure.reason)),
        };

        let validation: ValidationOutcome = self.stage_output(job, Stage::Validate, cycle).await?;
        self.persist(job, &rendered, &validation.report).await
    }

    /// Write the four artifacts to the object store, then commit the
    /// artifact registry + job success atomically.
    async fn persist(
        &self,
        job: &JobRecord,
        rendered: &RenderOutput,
        report: &EvaluationReport,
    ) -> Result<Step> {
        let prefix = format!("{}/{}", job.tenant_id, job.job_id);
        let keys = ArtifactKeys {
            docx_key: format!("{prefix}/tailored_resume.docx"),
            pdf_key: format!("{prefix}/tailored_resume.pdf"),
            change_log_key: format!("{prefix}/change_log.json"),
            report_key: format!("{prefix}/evaluation_report.json"),
        };

        let change_log_json = serde_json::to_vec(&rendered.change_log)
            .map_err(|e| TailorError::Storage(format!("change log: {e}")))?;
        let report_json = serde_json::to_string(report)
            .map_err(|e| TailorError::Storage(format!("evaluation report: {e}")))?;

        let attempt = self
            .store
            .last_attempt(&job.tenant_id, job.job_id, Stage::Persist, job.gap_fill_cycles)
            .await?
            + 1;
        self.begin_execution(job, Stage::Persist, job.gap_fill_cycles, attempt)
            .await?;

        // Object writes are idempotent per key; a crash between them leaves
        // the job in RENDER and re-dispatch overwrites the same keys.
        self.objects.put(&keys.docx_key, &rendered.docx).await?;
        self.objects.put(&keys.pdf_key, &rendered.pdf).await?;
        self.objects.put(&keys.change_log_key, &change_log_json).await?;
        self.objects
            .put(&keys.report_key, report_json.as_bytes())
            .await?;

        let hashes = vec![
            ("docx", content_hash(&rendered.docx)),
            ("pdf", content_hash(&rendered.pdf)),
            ("change-log", content_hash(&change_log_json)),
            ("evaluation-report", content_hash(report_json.as_bytes())),
        ];

        match self
            .store
            .persist_outcome(job, &keys, &hashes, &report_json)
            .await
        {
            Ok(_) => {
                self.store
                    .finish_stage_execution(
                        &job.tenant_id,
                        job.job_id,
                        Stage::Persist,
                        job.gap_fill_cycles,
                        attempt,
                        StageExecutionStatus::Succeeded,
                        None,
                        None,
                        Some(&serde_json::to_string(&keys).unwrap_or_default()),
                    )
                    .await?;
                info!(job_id = %job.job_id, "artifacts persisted, job done");
                Ok(Step::Persisted)
            }
            Err(e) if e.is_conflict() => {
                self.store
                    .finish_stage_execution(
                        &job.tenant_id,
                        job.job_id,
                        Stage::Persist,
                        job.gap_fill_cycles,
                        attempt,
                        StageExecutionStatus::Failed,
                        Some(ErrorClass::Transient),
                        Some("lost the version race during persist"),
                        None,
                    )
                    .await?;
                Ok(Step::Persisted) // Re-read; the winning writer decides.
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn gate_passes(&self, report: &EvaluationReport) -> bool {
        report.jd_coverage >= self.config.quality_gate.min_jd_coverage
            && report.ats_keyword_score >= self.config.quality_gate.min_ats_keyword_score
            && report.hallucinations.is_empty()
    }

    async fn load_input(&self, key: &str) -> Result<Vec<u8>> {
        self.objects.get(key).await?.ok_or_else(|| {
            TailorError::ObjectStore(format!("input document '{key}' disappeared after intake"))
        })
    }

    async fn stage_result_exists(&self, job: &JobRecord, stage: Stage, cycle: u32) -> Result<bool> {
        Ok(self
            .store
            .get_stage_result(&job.tenant_id, job.job_id, stage, cycle)
            .await?
            .is_some())
    }

    /// Stored output of a prerequisite stage; its absence is an invariant
    /// violation (the stage pointer got ahead of the recorded results).
    async fn stage_output<T: DeserializeOwned>(
        &self,
        job: &JobRecord,
        stage: Stage,
        cycle: u32,
    ) -> Result<T> {
        let json = self
            .store
            .get_stage_result(&job.tenant_id, job.job_id, stage, cycle)
            .await?
            .ok_or_else(|| {
                TailorError::job_state(format!(
                    "job {}/{} reached {} without a stored {stage} result",
                    job.tenant_id, job.job_id, job.stage
                ))
            })?;
        serde_json::from_str(&json)
            .map_err(|e| TailorError::Storage(format!("stored {stage} result is unreadable: {e}")))
    }

    async fn begin_execution(
        &self,
        job: &JobRecord,
        stage: Stage,
        cycle: u32,
        attempt: u32,
    ) -> Result<()> {
        let execution = StageExecutionRecord {
            tenant_id: job.tenant_id.clone(),
            job_id: job.job_id,
            stage,
            cycle,
            attempt,
            status: StageExecutionStatus::Running,
            error_class: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.store.begin_stage_execution(&execution).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// Wrap raw input bytes with a document type derived from the key extension.
fn payload_for(key: &str, bytes: Vec<u8>) -> DocumentPayload {
    let document_type = match key.rsplit('.').next() {
        Some("txt") | None => "plain-text".to_string(),
        Some(ext) => ext.to_ascii_lowercase(),
    };
    DocumentPayload {
        bytes,
        document_type,
    }
}

/// Texts to embed: the JD as one chunk, the base resume's experience as one,
/// and each validated resume as one.
fn embed_texts(parsed: &ParseOutput) -> Vec<String> {
    let jd = &parsed.job_description;
    let mut jd_chunk = jd.summary.clone();
    for line in jd.requirements.iter().chain(jd.responsibilities.iter()) {
        jd_chunk.push('\n');
        jd_chunk.push_str(line);
    }

    let mut texts = vec![jd_chunk];
    let experience: Vec<String> = parsed
        .base_resume
        .bullets()
        .map(str::to_string)
        .collect();
    texts.push(experience.join("\n"));

    for resume in &parsed.validated_resumes {
        let bullets: Vec<String> = resume.bullets().map(str::to_string).collect();
        texts.push(format!("{}\n{}", resume.summary, bullets.join("\n")));
    }
    texts
}

/// Dedupe evidence by text keeping the best score, rank by score (ties by
/// text for determinism), and truncate.
fn rank_evidence(chunks: Vec<EvidenceChunk>, limit: usize) -> Vec<EvidenceChunk> {
    let mut best: std::collections::BTreeMap<String, EvidenceChunk> = std::collections::BTreeMap::new();
    for chunk in chunks {
        match best.get(&chunk.text) {
            Some(existing) if existing.score >= chunk.score => {}
            _ => {
                best.insert(chunk.text.clone(), chunk);
            }
        }
    }

    let mut ranked: Vec<EvidenceChunk> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.text.cmp(&b.text))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use tailor_capabilities::evidence_chunk;
    use tailor_shared::FeedbackRecord;

    use crate::testutil::{
        self, FakeGenerate, FakeParse, FakeRetrieve, HangingParse, happy_capabilities,
    };

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(100),
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
        }
    }

    async fn orchestrator_with(
        capabilities: CapabilitySet,
    ) -> (Orchestrator, Arc<JobStore>, Arc<tailor_artifacts::FsObjectStore>) {
        let store = Arc::new(testutil::test_store().await);
        let objects = Arc::new(testutil::test_objects());
        let orchestrator = Orchestrator::new(
            store.clone(),
            objects.clone(),
            capabilities,
            quick_policy(),
            OrchestratorConfig::default(),
        );
        (orchestrator, store, objects)
    }

    async fn seed_inputs(objects: &dyn ObjectStore, job: &JobRecord) {
        objects
            .put(&job.jd_ref, b"Senior Data Engineer job description")
            .await
            .unwrap();
        objects
            .put(&job.resume_ref, b"Base resume text")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn happy_path_reaches_done() {
        let (orchestrator, store, objects) = orchestrator_with(happy_capabilities()).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        let done = orchestrator.run("tenant-a", job.job_id).await.unwrap();

        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.stage, Stage::Done);
        assert_eq!(done.gap_fill_cycles, 0);

        // The stored report satisfies the configured thresholds.
        let report: EvaluationReport =
            serde_json::from_str(done.report_json.as_deref().unwrap()).unwrap();
        assert!(report.jd_coverage >= 0.7);
        assert!(report.ats_keyword_score >= 0.6);
        assert!(report.hallucinations.is_empty());

        // All four artifacts landed in the object store.
        let keys = done.artifacts.unwrap();
        for (_, key) in keys.entries() {
            assert!(objects.exists(key).await.unwrap(), "missing artifact {key}");
        }

        // Every pipeline stage left execution history.
        let executions = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap();
        let stages: Vec<Stage> = executions.iter().map(|e| e.stage).collect();
        for stage in [
            Stage::Intake,
            Stage::Parse,
            Stage::Embed,
            Stage::Retrieve,
            Stage::Generate,
            Stage::Validate,
            Stage::Render,
            Stage::Persist,
        ] {
            assert!(stages.contains(&stage), "no execution recorded for {stage}");
        }
    }

    #[tokio::test]
    async fn missing_inputs_fail_intake() {
        let (orchestrator, _store, _objects) = orchestrator_with(happy_capabilities()).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/absent.txt", "tenant-a/resume/absent.txt")
            .await
            .unwrap();

        let failed = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.failure_reason, Some(FailureReason::InputMissing));
        assert_eq!(failed.stage, Stage::Intake);
    }

    #[tokio::test]
    async fn gap_fill_is_bounded_and_tags_the_failure() {
        let mut capabilities = happy_capabilities();
        // Every generation misses all targets and keywords.
        capabilities.generate = Arc::new(FakeGenerate::with_documents(vec![
            testutil::poor_document(),
        ]));
        let (orchestrator, store, objects) = orchestrator_with(capabilities).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        let failed = orchestrator.run("tenant-a", job.job_id).await.unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.failure_reason,
            Some(FailureReason::QualityGateExceeded)
        );
        assert_eq!(failed.gap_fill_cycles, 2);
        // Stage never advanced past VALIDATE.
        assert_eq!(failed.stage, Stage::Validate);

        // One GENERATE and one VALIDATE execution per cycle (0, 1, 2).
        let executions = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap();
        let generate_cycles: Vec<u32> = executions
            .iter()
            .filter(|e| e.stage == Stage::Generate)
            .map(|e| e.cycle)
            .collect();
        assert_eq!(generate_cycles, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn gap_fill_directive_carries_previous_gaps() {
        let generate = Arc::new(FakeGenerate::with_documents(vec![
            testutil::poor_document(),
            testutil::good_document(),
        ]));
        let mut capabilities = happy_capabilities();
        capabilities.generate = generate.clone();
        let (orchestrator, _store, objects) = orchestrator_with(capabilities).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        let done = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.gap_fill_cycles, 1);

        let requests = generate.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].directives.gap_fill.is_none());

        let directive = requests[1].directives.gap_fill.as_ref().unwrap();
        assert_eq!(directive.cycle, 1);
        assert!(
            directive
                .missing_targets
                .contains(&"Build reliable data pipelines".to_string())
        );
        assert!(directive.missing_keywords.contains(&"Airflow".to_string()));
    }

    #[tokio::test]
    async fn terminal_stage_failure_tags_the_job() {
        let mut capabilities = happy_capabilities();
        let parse = FakeParse::ok(testutil::sample_parse_output());
        parse
            .script
            .lock()
            .unwrap()
            .push(Err(CapabilityError::UnreadableDocument("bad scan".into())));
        capabilities.parse = Arc::new(parse);
        let (orchestrator, _store, objects) = orchestrator_with(capabilities).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        let failed = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.failure_reason,
            Some(FailureReason::UnreadableDocument)
        );
    }

    #[tokio::test]
    async fn transient_failures_are_invisible_when_retries_succeed() {
        let mut capabilities = happy_capabilities();
        let embed = Arc::new(testutil::FakeEmbed::flaky(2));
        capabilities.embed = embed.clone();
        let (orchestrator, store, objects) = orchestrator_with(capabilities).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        let done = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(embed.calls.load(Ordering::SeqCst), 3);

        let embed_rows: Vec<_> = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.stage == Stage::Embed)
            .collect();
        assert_eq!(embed_rows.len(), 3);
        assert_eq!(
            embed_rows
                .iter()
                .filter(|e| e.status == StageExecutionStatus::Failed)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn hanging_parse_fails_after_bounded_retries() {
        let mut capabilities = happy_capabilities();
        capabilities.parse = Arc::new(HangingParse);
        let (orchestrator, _store, objects) = orchestrator_with(capabilities).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        let failed = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        // Never left indefinitely RUNNING.
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.failure_reason,
            Some(FailureReason::UnreadableDocument)
        );
    }

    #[tokio::test]
    async fn cancellation_settles_at_the_next_boundary() {
        let (orchestrator, _store, objects) = orchestrator_with(happy_capabilities()).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        assert!(orchestrator.cancel("tenant-a", job.job_id).await.unwrap());
        let cancelled = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.stage, Stage::Intake);
    }

    #[tokio::test]
    async fn job_timeout_fails_regardless_of_stage() {
        let (orchestrator, store, objects) = orchestrator_with(happy_capabilities()).await;
        let mut job = testutil::new_job("tenant-a");
        job.created_at = Utc::now() - chrono::Duration::minutes(16);
        store.insert_job(&job).await.unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        let failed = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.failure_reason, Some(FailureReason::Timeout));
    }

    #[tokio::test]
    async fn rerun_after_done_is_a_no_op() {
        let (orchestrator, store, objects) = orchestrator_with(happy_capabilities()).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        let first = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(first.status, JobStatus::Succeeded);
        let executions_before = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap()
            .len();

        let second = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(second.status, JobStatus::Succeeded);
        assert_eq!(second.version, first.version);
        let executions_after = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap()
            .len();
        assert_eq!(executions_before, executions_after);
    }

    #[tokio::test]
    async fn feedback_joins_the_evidence_ranking() {
        let retrieve = Arc::new(FakeRetrieve::with_chunks(vec![evidence_chunk(
            "Build reliable data pipelines handling 2M events daily.",
            0.5,
        )]));
        let mut capabilities = happy_capabilities();
        capabilities.retrieve = retrieve;
        let (orchestrator, store, objects) = orchestrator_with(capabilities).await;
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        seed_inputs(objects.as_ref(), &job).await;

        store
            .insert_feedback(&FeedbackRecord {
                tenant_id: "tenant-a".into(),
                feedback_id: format!("{}#1", job.job_id),
                job_id: job.job_id,
                text: "Mentor junior engineers through weekly pairing rotations.".into(),
                score: 0.95,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let done = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);

        let retrieval: RetrieveOutput = serde_json::from_str(
            &store
                .get_stage_result("tenant-a", job.job_id, Stage::Retrieve, 0)
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        // Feedback outranks the weaker retrieval hit.
        assert_eq!(retrieval.chunks.len(), 2);
        assert_eq!(retrieval.chunks[0].score, 0.95);
        assert_eq!(
            retrieval.chunks[0].metadata.get("source").map(String::as_str),
            Some("feedback")
        );
    }

    #[test]
    fn evidence_ranking_dedupes_and_truncates() {
        let chunks = vec![
            evidence_chunk("alpha", 0.2),
            evidence_chunk("alpha", 0.9),
            evidence_chunk("beta", 0.5),
            evidence_chunk("gamma", 0.4),
        ];
        let ranked = rank_evidence(chunks, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].text, "alpha");
        assert_eq!(ranked[0].score, 0.9);
        assert_eq!(ranked[1].text, "beta");
    }

    #[test]
    fn payload_type_from_extension() {
        assert_eq!(payload_for("t/jd/a.txt", vec![]).document_type, "plain-text");
        assert_eq!(payload_for("t/jd/a.PDF", vec![]).document_type, "pdf");
    }
}
