//! Aggregation of steps and cluster sizing into one job request.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{EmrError, Result};
use crate::step::{ActionOnFailure, Step, StepRequest};

pub const DEFAULT_RELEASE_LABEL: &str = "emr-5.23.0";
pub const DEFAULT_JOB_FLOW_ROLE: &str = "EMR_EC2_DefaultRole";
pub const DEFAULT_SERVICE_ROLE: &str = "EMR_DefaultRole";

/// Accumulates the steps of a job.
///
/// Steps can only be appended. Nothing reaches the cluster service until
/// [`JobSpecBuilder::build`] has validated the request.
#[derive(Debug, Clone)]
pub struct JobSpecBuilder {
    name: String,
    cluster_size: u32,
    instance_type: String,
    logs_uri: String,
    action_on_failure: ActionOnFailure,
    release_label: String,
    job_flow_role: String,
    service_role: String,
    steps: Vec<Step>,
}

impl JobSpecBuilder {
    pub fn new(
        name: impl Into<String>,
        cluster_size: u32,
        instance_type: impl Into<String>,
        logs_uri: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cluster_size,
            instance_type: instance_type.into(),
            logs_uri: logs_uri.into(),
            action_on_failure: ActionOnFailure::default(),
            release_label: DEFAULT_RELEASE_LABEL.to_string(),
            job_flow_role: DEFAULT_JOB_FLOW_ROLE.to_string(),
            service_role: DEFAULT_SERVICE_ROLE.to_string(),
            steps: vec![],
        }
    }

    pub fn action_on_failure(mut self, action: ActionOnFailure) -> Self {
        self.action_on_failure = action;
        self
    }

    pub fn release_label(mut self, label: impl Into<String>) -> Self {
        self.release_label = label.into();
        self
    }

    pub fn roles(mut self, job_flow_role: impl Into<String>, service_role: impl Into<String>) -> Self {
        self.job_flow_role = job_flow_role.into();
        self.service_role = service_role.into();
        self
    }

    /// Append a step. Steps run in the order they were added.
    pub fn add_step(&mut self, step: impl Into<Step>) -> &mut Self {
        self.steps.push(step.into());
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Validate and freeze the request.
    pub fn build(&self) -> Result<JobSpec> {
        if self.steps.is_empty() {
            return Err(EmrError::InvalidSpec(format!(
                "job `{}` has no steps, add steps before submitting it",
                self.name
            )));
        }

        Ok(JobSpec {
            name: self.name.clone(),
            cluster_size: self.cluster_size,
            instance_type: self.instance_type.clone(),
            logs_uri: self.logs_uri.clone(),
            action_on_failure: self.action_on_failure,
            release_label: self.release_label.clone(),
            job_flow_role: self.job_flow_role.clone(),
            service_role: self.service_role.clone(),
            steps: self.steps.clone(),
        })
    }
}

/// A validated job request. Always has at least one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub cluster_size: u32,
    pub instance_type: String,
    pub logs_uri: String,
    /// Recorded for callers; EMR only knows per-step failure actions.
    pub action_on_failure: ActionOnFailure,
    pub release_label: String,
    pub job_flow_role: String,
    pub service_role: String,
    steps: Vec<Step>,
}

impl JobSpec {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Union of every step's required applications.
    pub fn applications(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .flat_map(|step| step.required_applications())
            .collect()
    }

    /// Render the request in the RunJobFlow shape.
    pub fn render(&self) -> JobRequest {
        let applications = self.applications();
        JobRequest {
            name: self.name.clone(),
            log_uri: self.logs_uri.clone(),
            release_label: self.release_label.clone(),
            instances: InstancesRequest {
                master_instance_type: self.instance_type.clone(),
                slave_instance_type: self.instance_type.clone(),
                instance_count: self.cluster_size,
            },
            visible_to_all_users: true,
            job_flow_role: self.job_flow_role.clone(),
            service_role: self.service_role.clone(),
            applications: (!applications.is_empty()).then(|| {
                applications
                    .into_iter()
                    .map(|name| ApplicationRequest { name })
                    .collect()
            }),
            steps: self.steps.iter().map(Step::render).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobRequest {
    pub name: String,
    pub log_uri: String,
    pub release_label: String,
    pub instances: InstancesRequest,
    pub visible_to_all_users: bool,
    pub job_flow_role: String,
    pub service_role: String,
    /// Absent, never empty, when no step needs an application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applications: Option<Vec<ApplicationRequest>>,
    pub steps: Vec<StepRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstancesRequest {
    pub master_instance_type: String,
    pub slave_instance_type: String,
    pub instance_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApplicationRequest {
    pub name: String,
}
