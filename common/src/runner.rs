//! Submitting a job and following it to completion.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::cluster::{ClusterService, PollOutcome};
use crate::error::{EmrError, Result};
use crate::path::S3Path;
use crate::results::ResultFetcher;
use crate::spec::JobSpec;

/// Fixed delay between two status checks of a step.
pub const POLL_DELAY: Duration = Duration::from_secs(30);

/// Default time budget for each step.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(900);

/// State of a job run.
///
/// `Pending -> Submitted -> Completed | Failed`. There is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not submitted yet.
    Pending,

    /// Accepted by the cluster service.
    Submitted,

    /// Every step completed.
    Completed,

    /// Submission or one of the steps failed.
    Failed,
}

/// Number of status checks that fit in `max_wait`, at least one.
pub fn max_attempts(max_wait: Duration) -> u32 {
    let wait = max_wait.as_secs() + u64::from(max_wait.subsec_nanos() > 0);
    let attempts = wait.div_ceil(POLL_DELAY.as_secs()).max(1);
    u32::try_from(attempts).unwrap_or(u32::MAX)
}

/// A job run context. Owned by one caller, advanced only by [`JobRunner`].
#[derive(Debug, Clone)]
pub struct JobRun {
    /// The job to submit.
    spec: JobSpec,

    /// Where the job writes its results, e.g. `s3://bucket/out/<run>`.
    output_path: S3Path,

    /// Remote id, known once submitted.
    job_id: Option<String>,

    state: RunState,

    /// Time budget for each step, not for the whole job.
    max_wait: Duration,

    /// When false, `execute` returns as soon as the job is submitted.
    wait_for_completion: bool,

    /// Why fetching the results failed, if it did.
    fetch_error: Option<String>,
}

impl JobRun {
    pub fn new(spec: JobSpec, output_path: S3Path) -> Self {
        Self {
            spec,
            output_path,
            job_id: None,
            state: RunState::Pending,
            max_wait: DEFAULT_MAX_WAIT,
            wait_for_completion: true,
            fetch_error: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn output_path(&self) -> &S3Path {
        &self.output_path
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn waits_for_completion(&self) -> bool {
        self.wait_for_completion
    }

    pub fn fetch_error(&self) -> Option<&str> {
        self.fetch_error.as_deref()
    }

    /// Status checks allowed per step.
    pub fn max_attempts(&self) -> u32 {
        max_attempts(self.max_wait)
    }
}

/// Drives a [`JobRun`] through submission, polling and result fetching.
pub struct JobRunner<C> {
    cluster: C,
    fetcher: Option<Box<dyn ResultFetcher>>,
}

impl<C: ClusterService> JobRunner<C> {
    pub fn new(cluster: C) -> Self {
        Self {
            cluster,
            fetcher: None,
        }
    }

    /// Run `fetcher` against the output path once the job completes.
    pub fn with_fetcher(mut self, fetcher: impl ResultFetcher + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Submit the job and, unless the run says otherwise, block until all of
    /// its steps are done.
    ///
    /// A failed result fetch is logged and recorded on the run, but does not
    /// fail a completed job.
    pub async fn execute(&self, run: &mut JobRun) -> Result<()> {
        if run.state != RunState::Pending {
            return Err(EmrError::InvalidState(run.state));
        }

        let job_id = match self.cluster.submit(&run.spec).await {
            Ok(job_id) => job_id,
            Err(err) => {
                run.state = RunState::Failed;
                error!("Submission of job `{}` failed: {:#}", run.spec.name, err);
                return Err(EmrError::Submission {
                    name: run.spec.name.clone(),
                    message: format!("{err:#}"),
                });
            }
        };

        info!("Job `{}` submitted as {}", run.spec.name, job_id);
        run.job_id = Some(job_id.clone());
        run.state = RunState::Submitted;

        if !run.wait_for_completion {
            info!("Not waiting for job {} to complete", job_id);
            return Ok(());
        }

        if let Err(err) = self.wait_for_steps(&job_id, run.max_attempts()).await {
            run.state = RunState::Failed;
            error!("Job {} failed: {}", job_id, err);
            return Err(err);
        }

        run.state = RunState::Completed;
        info!("Job {} completed", job_id);

        if let Some(fetcher) = &self.fetcher {
            if let Err(err) = fetcher.fetch(&run.output_path).await {
                error!("Fetching results of job {} failed: {}", job_id, err);
                run.fetch_error = Some(err.to_string());
            }
        }

        Ok(())
    }

    /// Wait on each step in turn. Each step gets the full attempt budget.
    async fn wait_for_steps(&self, job_id: &str, max_attempts: u32) -> Result<()> {
        let steps = self
            .cluster
            .list_steps(job_id)
            .await
            .map_err(|err| EmrError::ListSteps {
                job_id: job_id.to_string(),
                message: format!("{err:#}"),
            })?;

        for step in steps {
            info!("Waiting for step `{}` ({}) of job {}", step.name, step.id, job_id);

            let outcome = self
                .cluster
                .await_step_completion(job_id, &step.id, POLL_DELAY, max_attempts)
                .await
                .map_err(|err| EmrError::Poll {
                    job_id: job_id.to_string(),
                    step_id: step.id.clone(),
                    message: format!("{err:#}"),
                })?;

            match outcome {
                PollOutcome::Terminal(state) if state.is_success() => {
                    info!("Step `{}` completed", step.name);
                }
                PollOutcome::Terminal(state) => {
                    return Err(EmrError::StepFailed {
                        job_id: job_id.to_string(),
                        step_id: step.id,
                        state: state.to_string(),
                    });
                }
                PollOutcome::Exhausted { last } => {
                    warn!("Step `{}` still {} after {} attempts", step.name, last, max_attempts);
                    return Err(EmrError::Timeout {
                        job_id: job_id.to_string(),
                        step_id: step.id,
                        attempts: max_attempts,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::cluster::{StepState, StepSummary};
    use crate::spec::JobSpecBuilder;
    use crate::step::HadoopStep;

    #[derive(Default)]
    struct Calls {
        submits: u32,
        list_steps: u32,
        polls: Vec<(String, Duration, u32)>,
    }

    /// Cluster fake with scripted answers.
    #[derive(Default)]
    struct FakeCluster {
        reject: bool,
        steps: Vec<StepSummary>,
        outcomes: Mutex<VecDeque<PollOutcome>>,
        calls: Arc<Mutex<Calls>>,
    }

    impl FakeCluster {
        fn with_steps(ids: &[&str], outcomes: Vec<PollOutcome>) -> Self {
            Self {
                steps: ids
                    .iter()
                    .map(|id| StepSummary {
                        id: id.to_string(),
                        name: format!("step {id}"),
                    })
                    .collect(),
                outcomes: Mutex::new(outcomes.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ClusterService for FakeCluster {
        async fn submit(&self, _spec: &JobSpec) -> anyhow::Result<String> {
            self.calls.lock().unwrap().submits += 1;
            if self.reject {
                return Err(anyhow!("ValidationException: instance type not supported"));
            }
            Ok("j-TEST".to_string())
        }

        async fn list_steps(&self, _job_id: &str) -> anyhow::Result<Vec<StepSummary>> {
            self.calls.lock().unwrap().list_steps += 1;
            Ok(self.steps.clone())
        }

        async fn await_step_completion(
            &self,
            _job_id: &str,
            step_id: &str,
            delay: Duration,
            max_attempts: u32,
        ) -> anyhow::Result<PollOutcome> {
            self.calls
                .lock()
                .unwrap()
                .polls
                .push((step_id.to_string(), delay, max_attempts));
            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PollOutcome::Terminal(StepState::Completed)))
        }
    }

    struct FakeFetcher {
        fail: bool,
        fetched: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ResultFetcher for FakeFetcher {
        async fn fetch(&self, output: &S3Path) -> Result<()> {
            self.fetched.lock().unwrap().push(output.to_string());
            if self.fail {
                return Err(EmrError::EmptyResult {
                    path: output.join("part-")?.to_string(),
                });
            }
            Ok(())
        }
    }

    fn job_run() -> JobRun {
        let mut builder = JobSpecBuilder::new("Test EMR Run", 1, "m5.large", "s3://some-bucket/logs");
        builder.add_step(HadoopStep::new("s3://my/jar/path", vec!["s3://my/input".into()]));
        JobRun::new(builder.build().unwrap(), S3Path::parse("s3://my/output").unwrap())
    }

    #[test]
    fn job_run_defaults() {
        let run = job_run();
        assert_eq!(run.max_wait(), Duration::from_secs(900));
        assert!(run.waits_for_completion());
        assert_eq!(run.state(), RunState::Pending);
        assert_eq!(run.job_id(), None);
        assert_eq!(run.max_attempts(), 30);
    }

    #[test]
    fn attempts_round_up() {
        assert_eq!(max_attempts(Duration::from_secs(90)), 3);
        assert_eq!(max_attempts(Duration::from_secs(91)), 4);
        assert_eq!(max_attempts(Duration::from_secs(3600)), 120);
        assert_eq!(max_attempts(Duration::from_millis(30_001)), 2);
        assert_eq!(max_attempts(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn completes_and_polls_every_step() {
        let cluster = FakeCluster::with_steps(&["s-1", "s-2"], vec![]);
        let calls = cluster.calls.clone();
        let runner = JobRunner::new(cluster);
        let mut run = job_run().with_max_wait(Duration::from_secs(90));

        runner.execute(&mut run).await.unwrap();

        assert_eq!(run.state(), RunState::Completed);
        assert_eq!(run.job_id(), Some("j-TEST"));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.submits, 1);
        assert_eq!(
            calls.polls,
            vec![
                ("s-1".to_string(), Duration::from_secs(30), 3),
                ("s-2".to_string(), Duration::from_secs(30), 3),
            ]
        );
    }

    #[tokio::test]
    async fn submission_failure_never_polls() {
        let cluster = FakeCluster {
            reject: true,
            ..FakeCluster::with_steps(&["s-1"], vec![])
        };
        let calls = cluster.calls.clone();
        let runner = JobRunner::new(cluster);
        let mut run = job_run();

        let err = runner.execute(&mut run).await.unwrap_err();

        assert!(matches!(err, EmrError::Submission { .. }));
        assert!(err.to_string().contains("instance type not supported"));
        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(run.job_id(), None);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.list_steps, 0);
        assert!(calls.polls.is_empty());
    }

    #[tokio::test]
    async fn timeout_fails_run_and_skips_remaining_steps() {
        let cluster = FakeCluster::with_steps(
            &["s-1", "s-2", "s-3"],
            vec![
                PollOutcome::Terminal(StepState::Completed),
                PollOutcome::Exhausted { last: StepState::Running },
            ],
        );
        let calls = cluster.calls.clone();
        let runner = JobRunner::new(cluster);
        let mut run = job_run();

        let err = runner.execute(&mut run).await.unwrap_err();

        match err {
            EmrError::Timeout { job_id, step_id, attempts } => {
                assert_eq!(job_id, "j-TEST");
                assert_eq!(step_id, "s-2");
                assert_eq!(attempts, 30);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(calls.lock().unwrap().polls.len(), 2);
    }

    #[tokio::test]
    async fn failed_step_fails_run() {
        let cluster = FakeCluster::with_steps(
            &["s-1"],
            vec![PollOutcome::Terminal(StepState::Failed)],
        );
        let runner = JobRunner::new(cluster);
        let mut run = job_run();

        let err = runner.execute(&mut run).await.unwrap_err();

        assert!(matches!(err, EmrError::StepFailed { ref state, .. } if state == "FAILED"));
        assert_eq!(run.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn no_wait_returns_after_submission() {
        let cluster = FakeCluster::with_steps(&["s-1"], vec![]);
        let calls = cluster.calls.clone();
        let fetched = Arc::new(Mutex::new(vec![]));
        let runner = JobRunner::new(cluster).with_fetcher(FakeFetcher {
            fail: false,
            fetched: fetched.clone(),
        });
        let mut run = job_run().with_wait_for_completion(false);

        runner.execute(&mut run).await.unwrap();

        assert_eq!(run.state(), RunState::Submitted);
        assert_eq!(calls.lock().unwrap().list_steps, 0);
        assert!(fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetches_results_on_completion() {
        let fetched = Arc::new(Mutex::new(vec![]));
        let runner = JobRunner::new(FakeCluster::with_steps(&["s-1"], vec![])).with_fetcher(
            FakeFetcher {
                fail: false,
                fetched: fetched.clone(),
            },
        );
        let mut run = job_run();

        runner.execute(&mut run).await.unwrap();

        assert_eq!(*fetched.lock().unwrap(), vec!["s3://my/output"]);
        assert_eq!(run.fetch_error(), None);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_completed_state() {
        let fetched = Arc::new(Mutex::new(vec![]));
        let runner = JobRunner::new(FakeCluster::with_steps(&["s-1"], vec![])).with_fetcher(
            FakeFetcher {
                fail: true,
                fetched: fetched.clone(),
            },
        );
        let mut run = job_run();

        runner.execute(&mut run).await.unwrap();

        assert_eq!(run.state(), RunState::Completed);
        assert!(run.fetch_error().unwrap().contains("s3://my/output/part-"));
    }

    #[tokio::test]
    async fn terminal_run_cannot_be_executed_again() {
        let runner = JobRunner::new(FakeCluster::with_steps(&["s-1"], vec![]));
        let mut run = job_run();
        runner.execute(&mut run).await.unwrap();

        let err = runner.execute(&mut run).await.unwrap_err();

        assert!(matches!(err, EmrError::InvalidState(RunState::Completed)));
        assert_eq!(runner.cluster().calls.lock().unwrap().submits, 1);
    }
}
