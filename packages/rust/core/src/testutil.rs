//! Shared fixtures for core tests: temp stores and scripted capability fakes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use tailor_artifacts::FsObjectStore;
use tailor_capabilities::{
    CapabilityError, CapabilityResult, CapabilitySet, EmbedCapability, EmbedOutput, EmbedRequest,
    GenerateCapability, GenerateOutput, GenerateRequest, ParseCapability, ParseOutput,
    ParseRequest, RenderCapability, RenderOutput, RenderRequest, RetrieveCapability,
    RetrieveOutput, RetrieveRequest, evidence_chunk,
};
use tailor_shared::{
    ChangeLogEntry, ExperienceRole, JobDescription, JobId, JobRecord, JobStatus, ResumeDocument,
    Stage,
};
use tailor_storage::JobStore;

pub(crate) async fn test_store() -> JobStore {
    let tmp = std::env::temp_dir().join(format!("tailor_core_{}.db", Uuid::now_v7()));
    JobStore::open(&tmp).await.expect("open test db")
}

pub(crate) fn test_objects() -> FsObjectStore {
    let root = std::env::temp_dir().join(format!("tailor_core_objects_{}", Uuid::now_v7()));
    FsObjectStore::new(root).expect("create object store")
}

pub(crate) fn new_job(tenant: &str) -> JobRecord {
    let now = Utc::now();
    JobRecord {
        tenant_id: tenant.into(),
        job_id: JobId::new(),
        stage: Stage::Intake,
        status: JobStatus::Pending,
        failure_reason: None,
        gap_fill_cycles: 0,
        cancel_requested: false,
        jd_ref: format!("{tenant}/jd/input.txt"),
        resume_ref: format!("{tenant}/resume/input.txt"),
        artifacts: None,
        report_json: None,
        version: 0,
        created_at: now,
        updated_at: now,
        expires_at: now + Duration::days(7),
        tombstoned: false,
    }
}

pub(crate) async fn insert_job(store: &JobStore, tenant: &str) -> JobRecord {
    let job = new_job(tenant);
    store.insert_job(&job).await.expect("insert job");
    job
}

/// A JD whose requirements/skills line up with [`good_document`].
pub(crate) fn sample_jd() -> JobDescription {
    JobDescription {
        summary: "We run the analytics platform for mid-market retailers.".into(),
        requirements: vec![
            "Build reliable data pipelines".into(),
            "Mentor junior engineers".into(),
        ],
        skills: vec!["Airflow".into(), "Python".into()],
        ..Default::default()
    }
}

/// A tailored document that clears the default quality gate against
/// [`sample_jd`].
pub(crate) fn good_document() -> ResumeDocument {
    ResumeDocument {
        summary: "Data engineer who builds reliable data pipelines in Airflow and Python.".into(),
        experience: vec![ExperienceRole {
            title: "Senior Data Engineer".into(),
            company: "Acme".into(),
            achievements: vec![
                "Build reliable data pipelines handling 2M events daily.".into(),
                "Mentor junior engineers through weekly pairing rotations.".into(),
            ],
            ..Default::default()
        }],
        skills: vec!["Airflow".into(), "Python".into()],
        ..Default::default()
    }
}

/// A tailored document that misses every JD target and keyword.
pub(crate) fn poor_document() -> ResumeDocument {
    ResumeDocument {
        summary: "Seasoned pastry chef.".into(),
        experience: vec![ExperienceRole {
            title: "Chef".into(),
            achievements: vec!["Crafted 40 wedding cakes.".into()],
            ..Default::default()
        }],
        skills: vec!["Lamination".into()],
        ..Default::default()
    }
}

pub(crate) fn sample_parse_output() -> ParseOutput {
    ParseOutput {
        job_description: sample_jd(),
        base_resume: good_document(),
        validated_resumes: vec![],
        extracted_skills: vec![],
    }
}

// ---------------------------------------------------------------------------
// Scripted capability fakes
// ---------------------------------------------------------------------------

type Script<T> = Mutex<Vec<CapabilityResult<T>>>;

fn next_scripted<T>(script: &Script<T>, fallback: impl FnOnce() -> CapabilityResult<T>) -> CapabilityResult<T> {
    let mut responses = script.lock().expect("script lock");
    if responses.is_empty() {
        fallback()
    } else {
        responses.remove(0)
    }
}

/// Parse fake: scripted responses first, then a fixed output.
pub(crate) struct FakeParse {
    pub output: ParseOutput,
    pub script: Script<ParseOutput>,
    pub calls: AtomicU32,
}

impl FakeParse {
    pub fn ok(output: ParseOutput) -> Self {
        Self {
            output,
            script: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ParseCapability for FakeParse {
    async fn parse(&self, _request: ParseRequest) -> CapabilityResult<ParseOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = self.output.clone();
        next_scripted(&self.script, move || Ok(output))
    }
}

/// Parse fake that never responds (timeout scenario).
pub(crate) struct HangingParse;

#[async_trait]
impl ParseCapability for HangingParse {
    async fn parse(&self, _request: ParseRequest) -> CapabilityResult<ParseOutput> {
        std::future::pending().await
    }
}

pub(crate) struct FakeEmbed {
    pub script: Script<EmbedOutput>,
    pub calls: AtomicU32,
}

impl FakeEmbed {
    pub fn ok() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` calls with a transient error, then succeed.
    pub fn flaky(n: usize) -> Self {
        let fake = Self::ok();
        {
            let mut script = fake.script.lock().unwrap();
            for _ in 0..n {
                script.push(Err(CapabilityError::Unavailable("embedder warming up".into())));
            }
        }
        fake
    }
}

#[async_trait]
impl EmbedCapability for FakeEmbed {
    async fn embed(&self, request: EmbedRequest) -> CapabilityResult<EmbedOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let count = request.texts.len();
        next_scripted(&self.script, move || {
            Ok(EmbedOutput {
                vectors: vec![vec![0.1, 0.2, 0.3]; count],
                dimension: 3,
            })
        })
    }
}

pub(crate) struct FakeRetrieve {
    pub chunks: Vec<tailor_shared::EvidenceChunk>,
    pub calls: AtomicU32,
}

impl FakeRetrieve {
    pub fn with_chunks(chunks: Vec<tailor_shared::EvidenceChunk>) -> Self {
        Self {
            chunks,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RetrieveCapability for FakeRetrieve {
    async fn retrieve(&self, _request: RetrieveRequest) -> CapabilityResult<RetrieveOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RetrieveOutput {
            chunks: self.chunks.clone(),
        })
    }
}

/// Generate fake: records each request, returns documents in sequence
/// (repeating the last one once the sequence is exhausted).
pub(crate) struct FakeGenerate {
    pub documents: Mutex<Vec<ResumeDocument>>,
    pub requests: Mutex<Vec<GenerateRequest>>,
    pub calls: AtomicU32,
}

impl FakeGenerate {
    pub fn with_documents(documents: Vec<ResumeDocument>) -> Self {
        Self {
            documents: Mutex::new(documents),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl GenerateCapability for FakeGenerate {
    async fn generate(&self, request: GenerateRequest) -> CapabilityResult<GenerateOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let mut documents = self.documents.lock().unwrap();
        let document = if documents.len() > 1 {
            documents.remove(0)
        } else {
            documents[0].clone()
        };
        Ok(GenerateOutput {
            document,
            change_log: vec![ChangeLogEntry {
                kind: "rewrite".into(),
                detail: "aligned bullets with the job description".into(),
                rationale: Some("coverage".into()),
            }],
        })
    }
}

pub(crate) struct FakeRender {
    pub calls: AtomicU32,
}

impl FakeRender {
    pub fn ok() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RenderCapability for FakeRender {
    async fn render(&self, request: RenderRequest) -> CapabilityResult<RenderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RenderOutput {
            docx: b"PK-docx".to_vec(),
            pdf: b"%PDF-1.4 fake".to_vec(),
            change_log: request.change_log,
        })
    }
}

/// A capability set whose evidence matches [`good_document`]'s bullets, so
/// the default happy path clears the hallucination check.
pub(crate) fn happy_capabilities() -> CapabilitySet {
    let evidence = vec![
        evidence_chunk(
            "Build reliable data pipelines handling 2M events daily.",
            0.92,
        ),
        evidence_chunk(
            "Mentor junior engineers through weekly pairing rotations.",
            0.88,
        ),
    ];
    CapabilitySet {
        parse: Arc::new(FakeParse::ok(sample_parse_output())),
        embed: Arc::new(FakeEmbed::ok()),
        retrieve: Arc::new(FakeRetrieve::with_chunks(evidence)),
        generate: Arc::new(FakeGenerate::with_documents(vec![good_document()])),
        render: Arc::new(FakeRender::ok()),
    }
}
