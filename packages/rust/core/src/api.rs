//! External job API: upload, submit, status, artifact download, housekeeping.
//!
//! This is the surface a transport (CLI, HTTP gateway) binds to. Tenant
//! identity arrives pre-extracted — authentication is a collaborator's
//! problem. `get_status` only ever reflects durably committed job state.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;
use uuid::Uuid;

use tailor_artifacts::{ObjectStore, SignedReference, sign_reference};
use tailor_shared::{JobId, JobSummary, Result, TailorError};

use crate::housekeeper::{Housekeeper, HousekeepingReport};
use crate::orchestrator::Orchestrator;

/// Kind of input document being uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    JobDescription,
    Resume,
}

impl UploadKind {
    fn prefix(self) -> &'static str {
        match self {
            UploadKind::JobDescription => "jd",
            UploadKind::Resume => "resume",
        }
    }
}

/// A signed artifact download entry.
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    pub kind: String,
    pub reference: SignedReference,
}

/// Facade over the orchestrator, store, and object store.
pub struct JobApi {
    orchestrator: Arc<Orchestrator>,
    housekeeper: Arc<Housekeeper>,
    objects: Arc<dyn ObjectStore>,
    /// Secret for signing download references.
    signing_secret: String,
    /// Validity window for signed download references.
    download_ttl: Duration,
}

impl JobApi {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        housekeeper: Arc<Housekeeper>,
        objects: Arc<dyn ObjectStore>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            housekeeper,
            objects,
            signing_secret: signing_secret.into(),
            download_ttl: Duration::minutes(15),
        }
    }

    /// Store an input document and return its tenant-scoped reference.
    pub async fn upload(
        &self,
        tenant_id: &str,
        kind: UploadKind,
        extension: &str,
        bytes: &[u8],
    ) -> Result<String> {
        if tenant_id.is_empty() {
            return Err(TailorError::validation("tenantId is required"));
        }
        if bytes.is_empty() {
            return Err(TailorError::validation("document content is required"));
        }
        let key = format!(
            "{tenant_id}/{}/{}.{}",
            kind.prefix(),
            Uuid::now_v7(),
            extension.trim_start_matches('.')
        );
        self.objects.put(&key, bytes).await?;
        info!(tenant_id, key, len = bytes.len(), "document uploaded");
        Ok(key)
    }

    /// Create a tailoring job from uploaded document references.
    pub async fn submit(
        &self,
        tenant_id: &str,
        jd_ref: &str,
        resume_ref: &str,
    ) -> Result<JobId> {
        if tenant_id.is_empty() {
            return Err(TailorError::validation("tenantId is required"));
        }
        if jd_ref.is_empty() || resume_ref.is_empty() {
            return Err(TailorError::validation(
                "jobDescription and baseResume references are required",
            ));
        }
        let job = self
            .orchestrator
            .create_job(tenant_id, jd_ref, resume_ref)
            .await?;
        Ok(job.job_id)
    }

    /// Drive a job to a terminal state and return its summary.
    pub async fn run(&self, tenant_id: &str, job_id: JobId) -> Result<JobSummary> {
        let job = self.orchestrator.run(tenant_id, job_id).await?;
        Ok(JobSummary::from(&job))
    }

    /// Last durably committed state of a job.
    pub async fn get_status(&self, tenant_id: &str, job_id: JobId) -> Result<JobSummary> {
        let job = self
            .orchestrator
            .store()
            .get_job(tenant_id, job_id)
            .await?
            .ok_or_else(|| TailorError::job_state(format!("unknown job {tenant_id}/{job_id}")))?;
        Ok(JobSummary::from(&job))
    }

    /// Request cooperative cancellation.
    pub async fn cancel(&self, tenant_id: &str, job_id: JobId) -> Result<bool> {
        self.orchestrator.cancel(tenant_id, job_id).await
    }

    /// Signed download references for a job's live artifacts.
    pub async fn get_artifacts(
        &self,
        tenant_id: &str,
        job_id: JobId,
    ) -> Result<Vec<ArtifactDownload>> {
        let rows = self
            .orchestrator
            .store()
            .get_artifacts(tenant_id, job_id)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| !row.deleted)
            .map(|row| ArtifactDownload {
                kind: row.kind,
                reference: sign_reference(&row.object_key, &self.signing_secret, self.download_ttl),
            })
            .collect())
    }

    /// All live artifact keys for a tenant.
    pub async fn list_artifacts(&self, tenant_id: &str) -> Result<Vec<String>> {
        let rows = self.orchestrator.store().list_artifacts(tenant_id).await?;
        Ok(rows.into_iter().map(|row| row.object_key).collect())
    }

    /// One housekeeping sweep (periodic, not user-invoked).
    pub async fn run_housekeeping(&self) -> Result<HousekeepingReport> {
        self.housekeeper.run_once().await
    }
}
