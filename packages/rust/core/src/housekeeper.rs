//! Periodic sweep: resume stuck jobs, enforce the absolute TTL, expire
//! artifacts.
//!
//! The housekeeper shares no state with in-flight orchestrator runs — it
//! re-reads the job store and re-dispatches through the same idempotent
//! stage machinery, so racing a live run is safe by construction.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use tailor_artifacts::ObjectStore;
use tailor_shared::{HousekeepingConfig, Result};

use crate::orchestrator::Orchestrator;

/// Summary of one housekeeping sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct HousekeepingReport {
    /// Stuck jobs re-dispatched through the orchestrator.
    pub resumed: usize,
    /// Jobs force-failed past the absolute TTL.
    pub timed_out: usize,
    /// Succeeded jobs whose artifacts were expired and tombstoned.
    pub expired: usize,
}

/// Periodic recovery and retention sweeper.
pub struct Housekeeper {
    orchestrator: Arc<Orchestrator>,
    objects: Arc<dyn ObjectStore>,
    config: HousekeepingConfig,
    /// Absolute wall-clock TTL for a job (mirrors the orchestrator's bound).
    job_timeout: Duration,
}

impl Housekeeper {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        objects: Arc<dyn ObjectStore>,
        config: HousekeepingConfig,
        job_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            objects,
            config,
            job_timeout,
        }
    }

    /// One full sweep over stuck and expired jobs.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<HousekeepingReport> {
        let mut report = HousekeepingReport::default();
        let now = Utc::now();
        let store = self.orchestrator.store().clone();

        let idle_cutoff = now - chrono::Duration::seconds(self.config.stuck_after_secs as i64);
        let stuck = store.list_stuck_jobs(idle_cutoff).await?;
        for job in stuck {
            let deadline =
                job.created_at + chrono::Duration::seconds(self.job_timeout.as_secs() as i64);
            if now > deadline {
                // Past the absolute TTL: force-fail instead of resuming. The
                // orchestrator applies the same check, so just dispatching it
                // settles the job; counting it separately keeps the report
                // honest.
                report.timed_out += 1;
            } else {
                report.resumed += 1;
            }

            // Idempotent re-dispatch: completed stages short-circuit.
            match self.orchestrator.run(&job.tenant_id, job.job_id).await {
                Ok(settled) => {
                    info!(
                        tenant_id = %job.tenant_id,
                        job_id = %job.job_id,
                        status = %settled.status,
                        "housekeeper settled a stuck job"
                    );
                }
                Err(e) => {
                    // Leave the job in its last persisted state for the next
                    // sweep; never advance it blindly.
                    warn!(
                        tenant_id = %job.tenant_id,
                        job_id = %job.job_id,
                        error = %e,
                        "housekeeper failed to settle job"
                    );
                }
            }
        }

        let expired = store.list_expired_jobs(now).await?;
        for mut job in expired {
            let artifacts = store.get_artifacts(&job.tenant_id, job.job_id).await?;
            for artifact in artifacts.iter().filter(|a| !a.deleted) {
                if let Err(e) = self.objects.delete(&artifact.object_key).await {
                    warn!(
                        key = %artifact.object_key,
                        error = %e,
                        "failed to delete expired artifact object"
                    );
                }
            }
            store
                .mark_artifacts_deleted(&job.tenant_id, job.job_id)
                .await?;

            // Logical deletion only — the job row stays queryable.
            job.tombstoned = true;
            match store.update_job(&job).await {
                Ok(_) => {
                    report.expired += 1;
                    info!(
                        tenant_id = %job.tenant_id,
                        job_id = %job.job_id,
                        "expired job tombstoned"
                    );
                }
                Err(e) if e.is_conflict() => {
                    // A concurrent writer touched the row; the next sweep
                    // will pick it up again.
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Run sweeps forever on the configured interval. Intended to be spawned.
    pub async fn run_interval(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(report) => {
                    if report.resumed + report.timed_out + report.expired > 0 {
                        info!(
                            resumed = report.resumed,
                            timed_out = report.timed_out,
                            expired = report.expired,
                            "housekeeping sweep complete"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "housekeeping sweep failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tailor_shared::{FailureReason, JobStatus, Stage};
    use tailor_storage::JobStore;

    use crate::executor::RetryPolicy;
    use crate::orchestrator::OrchestratorConfig;
    use crate::testutil::{self, happy_capabilities};

    async fn setup() -> (Arc<Housekeeper>, Arc<Orchestrator>, Arc<JobStore>, Arc<tailor_artifacts::FsObjectStore>) {
        let store = Arc::new(testutil::test_store().await);
        let objects = Arc::new(testutil::test_objects());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            objects.clone(),
            happy_capabilities(),
            RetryPolicy {
                max_attempts: 2,
                attempt_timeout: Duration::from_millis(100),
                base_delay: Duration::from_millis(1),
                backoff_multiplier: 2.0,
            },
            OrchestratorConfig::default(),
        ));
        let housekeeper = Arc::new(Housekeeper::new(
            orchestrator.clone(),
            objects.clone(),
            HousekeepingConfig {
                stuck_after_secs: 60,
                sweep_interval_secs: 60,
            },
            Duration::from_secs(900),
        ));
        (housekeeper, orchestrator, store, objects)
    }

    #[tokio::test]
    async fn resumes_stuck_jobs_to_completion() {
        let (housekeeper, _orchestrator, store, objects) = setup().await;

        // A job that stalled mid-pipeline: inserted five minutes ago, never
        // advanced past INTAKE.
        let mut job = testutil::new_job("tenant-a");
        job.created_at = Utc::now() - chrono::Duration::minutes(5);
        job.updated_at = job.created_at;
        job.status = JobStatus::Running;
        store.insert_job(&job).await.unwrap();
        objects.put(&job.jd_ref, b"jd text").await.unwrap();
        objects.put(&job.resume_ref, b"resume text").await.unwrap();

        let report = housekeeper.run_once().await.unwrap();
        assert_eq!(report.resumed, 1);
        assert_eq!(report.timed_out, 0);

        let settled = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, JobStatus::Succeeded);
        assert_eq!(settled.stage, Stage::Done);
    }

    #[tokio::test]
    async fn force_fails_jobs_past_the_absolute_ttl() {
        let (housekeeper, _orchestrator, store, _objects) = setup().await;

        let mut job = testutil::new_job("tenant-a");
        job.created_at = Utc::now() - chrono::Duration::minutes(20);
        job.updated_at = job.created_at;
        job.status = JobStatus::Running;
        job.stage = Stage::Generate;
        store.insert_job(&job).await.unwrap();

        let report = housekeeper.run_once().await.unwrap();
        assert_eq!(report.timed_out, 1);

        let settled = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, JobStatus::Failed);
        assert_eq!(settled.failure_reason, Some(FailureReason::Timeout));
    }

    #[tokio::test]
    async fn fresh_jobs_are_left_alone() {
        let (housekeeper, _orchestrator, store, _objects) = setup().await;
        let job = testutil::insert_job(&store, "tenant-a").await;

        let report = housekeeper.run_once().await.unwrap();
        assert_eq!(report.resumed, 0);
        assert_eq!(report.timed_out, 0);

        let untouched = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn expired_artifacts_are_deleted_and_job_tombstoned() {
        let (housekeeper, orchestrator, store, objects) = setup().await;

        // Run a job to completion, then age it past its retention TTL.
        let job = orchestrator
            .create_job("tenant-a", "tenant-a/jd/input.txt", "tenant-a/resume/input.txt")
            .await
            .unwrap();
        objects.put(&job.jd_ref, b"jd").await.unwrap();
        objects.put(&job.resume_ref, b"resume").await.unwrap();
        let done = orchestrator.run("tenant-a", job.job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);

        let mut done = done;
        done.expires_at = Utc::now() - chrono::Duration::days(1);
        store.update_job(&done).await.unwrap();

        let report = housekeeper.run_once().await.unwrap();
        assert_eq!(report.expired, 1);

        let swept = store
            .get_job("tenant-a", job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert!(swept.tombstoned);
        // Status is preserved; deletion is logical.
        assert_eq!(swept.status, JobStatus::Succeeded);

        for artifact in store.get_artifacts("tenant-a", job.job_id).await.unwrap() {
            assert!(artifact.deleted);
            assert!(!objects.exists(&artifact.object_key).await.unwrap());
        }

        // A second sweep finds nothing new.
        let report = housekeeper.run_once().await.unwrap();
        assert_eq!(report.expired, 0);
    }
}
