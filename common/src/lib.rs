//! Users describe Hadoop and Spark steps, submit them as a single job to an
//! EMR cluster, wait for the job to finish, and turn the text it wrote to S3
//! into a table.

pub mod aws;
pub mod cluster;
pub mod error;
pub mod path;
pub mod results;
pub mod runner;
pub mod spec;
pub mod step;
pub mod store;

pub use aws::ClientConfig;
pub use cluster::{ClusterService, EmrClient, PollOutcome, StepState, StepSummary};
pub use error::{EmrError, Result};
pub use path::S3Path;
pub use results::{ColumnNames, CsvResultFetcher, Dialect, ResultFetcher, ResultTable, Row};
pub use runner::{JobRun, JobRunner, RunState};
pub use spec::{JobSpec, JobSpecBuilder};
pub use step::{ActionOnFailure, CommandStep, HadoopStep, SparkStep, Step};
pub use store::{ObjectStore, S3Client};
