//! The cluster-management capability and its EMR implementation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_emr as emr;
use aws_sdk_emr::types::{
    Application, HadoopJarStepConfig, JobFlowInstancesConfig, StepConfig,
};
use tracing::{debug, info};

use crate::aws::{sdk_error, ClientConfig};
use crate::spec::JobSpec;
use crate::step::{ActionOnFailure, StepRequest};

/// A step as listed by the cluster service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    pub id: String,
    pub name: String,
}

/// Remote status of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    CancelPending,
    Completed,
    Cancelled,
    Failed,
    Interrupted,
    Unknown(String),
}

impl StepState {
    /// Whether the step can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Cancelled | StepState::Failed | StepState::Interrupted
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepState::Completed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepState::Pending => "PENDING",
            StepState::Running => "RUNNING",
            StepState::CancelPending => "CANCEL_PENDING",
            StepState::Completed => "COMPLETED",
            StepState::Cancelled => "CANCELLED",
            StepState::Failed => "FAILED",
            StepState::Interrupted => "INTERRUPTED",
            StepState::Unknown(name) => name.as_str(),
        };
        f.write_str(name)
    }
}

impl From<&emr::types::StepState> for StepState {
    fn from(state: &emr::types::StepState) -> Self {
        use emr::types::StepState as Remote;
        match state {
            Remote::Pending => StepState::Pending,
            Remote::Running => StepState::Running,
            Remote::CancelPending => StepState::CancelPending,
            Remote::Completed => StepState::Completed,
            Remote::Cancelled => StepState::Cancelled,
            Remote::Failed => StepState::Failed,
            Remote::Interrupted => StepState::Interrupted,
            other => StepState::Unknown(other.as_str().to_string()),
        }
    }
}

/// Result of waiting on a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The step reached a terminal state.
    Terminal(StepState),

    /// Every attempt was used up; `last` is the final state observed.
    Exhausted { last: StepState },
}

/// Submit jobs to a cluster and watch their steps.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Submit a job and return its remote id.
    async fn submit(&self, spec: &JobSpec) -> anyhow::Result<String>;

    /// List the steps of a job in submission order.
    async fn list_steps(&self, job_id: &str) -> anyhow::Result<Vec<StepSummary>>;

    /// Wait until a step is terminal, checking every `delay` and giving up
    /// after `max_attempts` checks.
    async fn await_step_completion(
        &self,
        job_id: &str,
        step_id: &str,
        delay: Duration,
        max_attempts: u32,
    ) -> anyhow::Result<PollOutcome>;
}

/// Check `probe` up to `max_attempts` times, sleeping `delay` between checks.
pub async fn poll_step<F, Fut>(
    delay: Duration,
    max_attempts: u32,
    mut probe: F,
) -> anyhow::Result<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<StepState>>,
{
    let mut last = StepState::Pending;
    for attempt in 1..=max_attempts {
        last = probe().await?;
        if last.is_terminal() {
            return Ok(PollOutcome::Terminal(last));
        }

        debug!(attempt, max_attempts, state = %last, "Step not finished yet");
        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Ok(PollOutcome::Exhausted { last })
}

/// [`ClusterService`] backed by AWS EMR.
#[derive(Debug, Clone)]
pub struct EmrClient {
    pub client: emr::Client,
}

impl EmrClient {
    pub fn from_conf(cfg: ClientConfig) -> Self {
        let cred = emr::config::Credentials::new(
            cfg.access_key_id,
            cfg.secret_access_key,
            None,
            None,
            "emr-ctl",
        );
        let region = emr::config::Region::new(cfg.region);
        let conf = emr::config::Builder::new()
            .credentials_provider(cred)
            .region(region)
            .behavior_version_latest()
            .build();

        Self {
            client: emr::Client::from_conf(conf),
        }
    }

    async fn step_state(&self, job_id: &str, step_id: &str) -> anyhow::Result<StepState> {
        let output = self
            .client
            .describe_step()
            .cluster_id(job_id)
            .step_id(step_id)
            .send()
            .await
            .map_err(sdk_error)?;

        output
            .step()
            .and_then(|step| step.status())
            .and_then(|status| status.state())
            .map(StepState::from)
            .ok_or_else(|| anyhow!("step {step_id} of job {job_id} has no status"))
    }
}

fn action_on_failure(action: ActionOnFailure) -> emr::types::ActionOnFailure {
    match action {
        ActionOnFailure::Continue => emr::types::ActionOnFailure::Continue,
        ActionOnFailure::Terminate => emr::types::ActionOnFailure::TerminateCluster,
        ActionOnFailure::CancelAndWait => emr::types::ActionOnFailure::CancelAndWait,
    }
}

fn step_config(step: &StepRequest) -> StepConfig {
    let jar_step = HadoopJarStepConfig::builder()
        .jar(&step.hadoop_jar_step.jar)
        .set_args(Some(step.hadoop_jar_step.args.clone()))
        .build();

    StepConfig::builder()
        .name(&step.name)
        .action_on_failure(action_on_failure(step.action_on_failure))
        .hadoop_jar_step(jar_step)
        .build()
}

#[async_trait]
impl ClusterService for EmrClient {
    async fn submit(&self, spec: &JobSpec) -> anyhow::Result<String> {
        let request = spec.render();

        let steps = request.steps.iter().map(step_config).collect::<Vec<_>>();

        let instances = JobFlowInstancesConfig::builder()
            .master_instance_type(&request.instances.master_instance_type)
            .slave_instance_type(&request.instances.slave_instance_type)
            .instance_count(i32::try_from(request.instances.instance_count)?)
            .build();

        let applications = request.applications.map(|apps| {
            apps.into_iter()
                .map(|app| Application::builder().name(app.name).build())
                .collect::<Vec<_>>()
        });

        let output = self
            .client
            .run_job_flow()
            .name(&request.name)
            .log_uri(&request.log_uri)
            .release_label(&request.release_label)
            .instances(instances)
            .visible_to_all_users(request.visible_to_all_users)
            .job_flow_role(&request.job_flow_role)
            .service_role(&request.service_role)
            .set_applications(applications)
            .set_steps(Some(steps))
            .send()
            .await
            .map_err(sdk_error)?;

        let job_id = output
            .job_flow_id()
            .ok_or_else(|| anyhow!("EMR did not return a job flow id"))?
            .to_string();

        info!("Submitted job `{}` as {}", request.name, job_id);
        Ok(job_id)
    }

    async fn list_steps(&self, job_id: &str) -> anyhow::Result<Vec<StepSummary>> {
        let mut response = self
            .client
            .list_steps()
            .cluster_id(job_id)
            .into_paginator()
            .send();

        let mut steps = vec![];
        while let Some(result) = response.next().await {
            let output = result.map_err(sdk_error)?;
            for step in output.steps() {
                steps.push(StepSummary {
                    id: step.id().unwrap_or_default().to_string(),
                    name: step.name().unwrap_or_default().to_string(),
                });
            }
        }

        // EMR lists the most recent step first.
        steps.reverse();
        Ok(steps)
    }

    async fn await_step_completion(
        &self,
        job_id: &str,
        step_id: &str,
        delay: Duration,
        max_attempts: u32,
    ) -> anyhow::Result<PollOutcome> {
        poll_step(delay, max_attempts, move || self.step_state(job_id, step_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::step::{HadoopStep, Step};

    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    #[test]
    fn terminal_states() {
        assert!(StepState::Completed.is_terminal());
        assert!(StepState::Failed.is_terminal());
        assert!(StepState::Cancelled.is_terminal());
        assert!(StepState::Interrupted.is_terminal());
        assert!(!StepState::Pending.is_terminal());
        assert!(!StepState::CancelPending.is_terminal());
        assert!(!StepState::Unknown("NEW".into()).is_terminal());
        assert!(StepState::Completed.is_success());
        assert!(!StepState::Failed.is_success());
    }

    #[test]
    fn remote_states_convert() {
        assert_eq!(StepState::from(&emr::types::StepState::Running), StepState::Running);
        assert_eq!(StepState::from(&emr::types::StepState::Completed), StepState::Completed);
        assert_eq!(StepState::Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn terminate_maps_to_terminate_cluster() {
        assert_eq!(
            action_on_failure(ActionOnFailure::Terminate),
            emr::types::ActionOnFailure::TerminateCluster
        );
    }

    #[test]
    fn rendered_step_becomes_step_config() {
        let request = Step::from(
            HadoopStep::new("s3://jars/app.jar", vec!["s3://in".into(), "s3://out".into()])
                .action_on_failure(ActionOnFailure::CancelAndWait),
        )
        .render();

        let config = step_config(&request);

        assert_eq!(config.name, "Hadoop Jar Step");
        assert_eq!(
            config.action_on_failure(),
            Some(&emr::types::ActionOnFailure::CancelAndWait)
        );
        let jar_step = config.hadoop_jar_step().unwrap();
        assert_eq!(jar_step.jar, "s3://jars/app.jar");
        assert_eq!(jar_step.args().to_vec(), vec!["s3://in", "s3://out"]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stops_at_terminal_state() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let outcome = poll_step(Duration::from_secs(30), 10, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, anyhow::Error>(if n < 3 { StepState::Running } else { StepState::Completed })
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Terminal(StepState::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);

        let outcome = poll_step(Duration::from_secs(30), 3, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(StepState::Running)
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Exhausted { last: StepState::Running });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_propagates_probe_errors() {
        let result = poll_step(Duration::from_secs(30), 3, || async {
            Err::<StepState, _>(anyhow!("throttled"))
        })
        .await;

        assert!(result.is_err());
    }
}
