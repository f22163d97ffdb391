//! Stage executor: one capability call under timeout, retry, and recording.
//!
//! Every attempt lands in the job store as a stage execution row *before* the
//! orchestrator observes the outcome, so the store reflects true history even
//! across a crash mid-stage. Completed `(job, stage, cycle)` results are
//! returned from the store without re-invoking the capability, which is what
//! makes housekeeper re-dispatch safe.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use tailor_capabilities::CapabilityResult;
use tailor_shared::{
    ErrorClass, FailureReason, JobRecord, Result, RetryConfig, Stage, StageExecutionRecord,
    StageExecutionStatus, TailorError,
};
use tailor_storage::JobStore;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded-retry policy applied to every remote stage call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per stage and cycle, including the first.
    pub max_attempts: u32,
    /// Per-attempt timeout.
    pub attempt_timeout: Duration,
    /// First backoff delay.
    pub base_delay: Duration,
    /// Backoff multiplier between attempts.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Deterministic exponential backoff before the given attempt (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay
            .mul_f64(self.backoff_multiplier.powi(exponent))
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a stage gave up.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub class: ErrorClass,
    pub reason: FailureReason,
    pub message: String,
    /// Attempts consumed in this cycle.
    pub attempts: u32,
}

/// Result of executing one stage.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Completed(T),
    Failed(StageFailure),
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs one capability call per stage with the configured retry policy.
pub struct StageExecutor {
    store: Arc<JobStore>,
    policy: RetryPolicy,
}

impl StageExecutor {
    pub fn new(store: Arc<JobStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `call` for `(job, stage, cycle)` under the retry policy.
    ///
    /// Short-circuits to the stored result if this `(job, stage, cycle)`
    /// already succeeded. Previously recorded attempts count against the
    /// attempt budget on resume.
    pub async fn execute<T, F, Fut>(
        &self,
        job: &JobRecord,
        stage: Stage,
        cycle: u32,
        call: F,
    ) -> Result<StageOutcome<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = CapabilityResult<T>>,
    {
        if let Some(stored) = self
            .store
            .get_stage_result(&job.tenant_id, job.job_id, stage, cycle)
            .await?
        {
            debug!(job_id = %job.job_id, %stage, cycle, "stage already completed, reusing result");
            let value = serde_json::from_str(&stored).map_err(|e| {
                TailorError::Storage(format!("stored {stage} result is unreadable: {e}"))
            })?;
            return Ok(StageOutcome::Completed(value));
        }

        let consumed = self
            .store
            .last_attempt(&job.tenant_id, job.job_id, stage, cycle)
            .await?;
        let mut attempt = consumed + 1;
        let mut last_failure: Option<StageFailure> = None;

        while attempt <= self.policy.max_attempts {
            self.begin_attempt(job, stage, cycle, attempt).await?;

            let outcome = tokio::time::timeout(self.policy.attempt_timeout, call()).await;
            match outcome {
                Ok(Ok(value)) => {
                    let output = serde_json::to_string(&value).map_err(|e| {
                        TailorError::Storage(format!("{stage} output not serializable: {e}"))
                    })?;
                    self.store
                        .finish_stage_execution(
                            &job.tenant_id,
                            job.job_id,
                            stage,
                            cycle,
                            attempt,
                            StageExecutionStatus::Succeeded,
                            None,
                            None,
                            Some(&output),
                        )
                        .await?;
                    debug!(job_id = %job.job_id, %stage, cycle, attempt, "stage succeeded");
                    return Ok(StageOutcome::Completed(value));
                }
                Ok(Err(error)) => {
                    let class = if error.is_transient() {
                        ErrorClass::Transient
                    } else {
                        ErrorClass::Terminal
                    };
                    let failure = StageFailure {
                        class,
                        reason: error.failure_reason(stage),
                        message: error.to_string(),
                        attempts: attempt,
                    };
                    self.record_failure(job, stage, cycle, attempt, &failure)
                        .await?;

                    if class == ErrorClass::Terminal {
                        return Ok(StageOutcome::Failed(failure));
                    }
                    last_failure = Some(failure);
                }
                Err(_elapsed) => {
                    let failure = StageFailure {
                        class: ErrorClass::Transient,
                        reason: timeout_reason(stage),
                        message: format!(
                            "attempt timed out after {:?}",
                            self.policy.attempt_timeout
                        ),
                        attempts: attempt,
                    };
                    self.record_failure(job, stage, cycle, attempt, &failure)
                        .await?;
                    last_failure = Some(failure);
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
            }
            attempt += 1;
        }

        let failure = last_failure.unwrap_or(StageFailure {
            class: ErrorClass::Transient,
            reason: timeout_reason(stage),
            message: format!(
                "attempt budget exhausted before dispatch ({} attempts recorded)",
                consumed
            ),
            attempts: consumed,
        });
        warn!(
            job_id = %job.job_id,
            %stage,
            cycle,
            attempts = failure.attempts,
            reason = %failure.reason,
            "stage exhausted its retry budget"
        );
        Ok(StageOutcome::Failed(failure))
    }

    async fn begin_attempt(
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

    async fn record_failure(
        &self,
        job: &JobRecord,
        stage: Stage,
        cycle: u32,
        attempt: u32,
        failure: &StageFailure,
    ) -> Result<()> {
        warn!(
            job_id = %job.job_id,
            %stage,
            cycle,
            attempt,
            class = ?failure.class,
            "stage attempt failed: {}",
            failure.message
        );
        self.store
            .finish_stage_execution(
                &job.tenant_id,
                job.job_id,
                stage,
                cycle,
                attempt,
                StageExecutionStatus::Failed,
                Some(failure.class),
                Some(&failure.message),
                None,
            )
            .await
    }
}

/// Failure reason when a stage's attempts all timed out.
fn timeout_reason(stage: Stage) -> FailureReason {
    tailor_capabilities::stage_failure_reason(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tailor_capabilities::CapabilityError;

    use crate::testutil;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            attempt_timeout: Duration::from_millis(50),
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(1),
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn success_records_one_execution() {
        let store = Arc::new(testutil::test_store().await);
        let job = testutil::insert_job(&store, "tenant-a").await;
        let executor = StageExecutor::new(store.clone(), quick_policy(3));

        let calls = AtomicU32::new(0);
        let outcome = executor
            .execute(&job, Stage::Embed, 0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { CapabilityResult::Ok(7u32) }
            })
            .await
            .expect("execute");

        assert!(matches!(outcome, StageOutcome::Completed(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let executions = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, StageExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let store = Arc::new(testutil::test_store().await);
        let job = testutil::insert_job(&store, "tenant-a").await;
        let executor = StageExecutor::new(store.clone(), quick_policy(3));

        let calls = AtomicU32::new(0);
        let outcome = executor
            .execute(&job, Stage::Retrieve, 0, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CapabilityError::Throttled("back off".into()))
                    } else {
                        Ok("evidence".to_string())
                    }
                }
            })
            .await
            .expect("execute");

        assert!(matches!(outcome, StageOutcome::Completed(ref s) if s == "evidence"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let executions = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap();
        assert_eq!(executions.len(), 3);
        let failed = executions
            .iter()
            .filter(|e| e.status == StageExecutionStatus::Failed)
            .count();
        assert_eq!(failed, 2);
    }

    #[tokio::test]
    async fn terminal_failure_surfaces_immediately() {
        let store = Arc::new(testutil::test_store().await);
        let job = testutil::insert_job(&store, "tenant-a").await;
        let executor = StageExecutor::new(store.clone(), quick_policy(3));

        let calls = AtomicU32::new(0);
        let outcome: StageOutcome<String> = executor
            .execute(&job, Stage::Generate, 0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CapabilityError::GenerationBlocked("policy refusal".into())) }
            })
            .await
            .expect("execute");

        match outcome {
            StageOutcome::Failed(failure) => {
                assert_eq!(failure.class, ErrorClass::Terminal);
                assert_eq!(failure.reason, FailureReason::GenerationBlocked);
                assert_eq!(failure.attempts, 1);
            }
            StageOutcome::Completed(_) => panic!("expected failure"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_transient_failures_fail_the_stage() {
        let store = Arc::new(testutil::test_store().await);
        let job = testutil::insert_job(&store, "tenant-a").await;
        let executor = StageExecutor::new(store.clone(), quick_policy(3));

        let outcome: StageOutcome<String> = executor
            .execute(&job, Stage::Embed, 0, || async {
                Err(CapabilityError::Unavailable("503".into()))
            })
            .await
            .expect("execute");

        match outcome {
            StageOutcome::Failed(failure) => {
                assert_eq!(failure.class, ErrorClass::Transient);
                assert_eq!(failure.reason, FailureReason::EmbeddingUnavailable);
                assert_eq!(failure.attempts, 3);
            }
            StageOutcome::Completed(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn hanging_attempts_time_out_and_retry() {
        let store = Arc::new(testutil::test_store().await);
        let job = testutil::insert_job(&store, "tenant-a").await;
        let executor = StageExecutor::new(store.clone(), quick_policy(2));

        let outcome: StageOutcome<String> = executor
            .execute(&job, Stage::Parse, 0, || async {
                std::future::pending::<CapabilityResult<String>>().await
            })
            .await
            .expect("execute");

        match outcome {
            StageOutcome::Failed(failure) => {
                assert_eq!(failure.class, ErrorClass::Transient);
                assert_eq!(failure.reason, FailureReason::UnreadableDocument);
                assert_eq!(failure.attempts, 2);
            }
            StageOutcome::Completed(_) => panic!("expected failure"),
        }

        let executions = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap();
        assert_eq!(executions.len(), 2);
        assert!(
            executions
                .iter()
                .all(|e| e.status == StageExecutionStatus::Failed)
        );
    }

    #[tokio::test]
    async fn completed_stage_short_circuits() {
        let store = Arc::new(testutil::test_store().await);
        let job = testutil::insert_job(&store, "tenant-a").await;
        let executor = StageExecutor::new(store.clone(), quick_policy(3));

        let first = executor
            .execute(&job, Stage::Embed, 0, || async { Ok(41u32) })
            .await
            .expect("first run");
        assert!(matches!(first, StageOutcome::Completed(41)));

        // Re-dispatch must reuse the stored result without calling again.
        let calls = AtomicU32::new(0);
        let second = executor
            .execute(&job, Stage::Embed, 0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(99u32) }
            })
            .await
            .expect("second run");
        assert!(matches!(second, StageOutcome::Completed(41)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let executions = store
            .list_stage_executions("tenant-a", job.job_id)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
    }

    #[tokio::test]
    async fn resume_counts_prior_attempts_against_the_budget() {
        let store = Arc::new(testutil::test_store().await);
        let job = testutil::insert_job(&store, "tenant-a").await;
        let executor = StageExecutor::new(store.clone(), quick_policy(2));

        // First dispatch burns both attempts.
        let _: StageOutcome<String> = executor
            .execute(&job, Stage::Retrieve, 0, || async {
                Err(CapabilityError::Unavailable("503".into()))
            })
            .await
            .expect("first run");

        // A later re-dispatch has no budget left and must not call at all.
        let calls = AtomicU32::new(0);
        let outcome: StageOutcome<String> = executor
            .execute(&job, Stage::Retrieve, 0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("late".to_string()) }
            })
            .await
            .expect("second run");

        assert!(matches!(outcome, StageOutcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
