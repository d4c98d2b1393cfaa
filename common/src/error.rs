//! Error types shared by the job builder, runner and result parser.

use thiserror::Error;

use crate::runner::RunState;

/// Errors raised while building, running or post-processing an EMR job.
#[derive(Error, Debug)]
pub enum EmrError {
    /// The job request violates a build-time contract, e.g. it has no steps.
    #[error("Invalid job spec: {0}")]
    InvalidSpec(String),

    /// An object-store address could not be parsed.
    #[error("Invalid S3 path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The cluster service rejected the job request.
    #[error("Submission of job `{name}` failed: {message}")]
    Submission { name: String, message: String },

    /// The cluster service could not list the steps of a submitted job.
    #[error("Listing steps of job {job_id} failed: {message}")]
    ListSteps { job_id: String, message: String },

    /// The cluster service errored while we were waiting on a step.
    #[error("Polling step {step_id} of job {job_id} failed: {message}")]
    Poll {
        job_id: String,
        step_id: String,
        message: String,
    },

    /// A step did not reach a terminal status within its attempt budget.
    #[error("Step {step_id} of job {job_id} did not finish after {attempts} attempts")]
    Timeout {
        job_id: String,
        step_id: String,
        attempts: u32,
    },

    /// A step finished, but not successfully.
    #[error("Step {step_id} of job {job_id} ended in state {state}")]
    StepFailed {
        job_id: String,
        step_id: String,
        state: String,
    },

    /// `execute` was called on a run that is no longer pending.
    #[error("Job run is already {0:?}")]
    InvalidState(RunState),

    /// No output object matched the expected prefix.
    #[error("No result files found under {path}")]
    EmptyResult { path: String },

    /// A result row does not fit the table's column layout.
    #[error("Malformed result at line {line}: {reason}")]
    MalformedResult { line: usize, reason: String },

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Result type for EMR operations.
pub type Result<T> = std::result::Result<T, EmrError>;
