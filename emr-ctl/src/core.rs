use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::info;

use common::results::fetch_results;
use common::{
    ClientConfig, ColumnNames, CsvResultFetcher, Dialect, EmrClient, HadoopStep, JobRun,
    JobRunner, JobSpecBuilder, RunState, S3Client, S3Path, SparkStep, Step,
};

use crate::args::ClusterArgs;

/// Label for a run, used in its S3 output directory and local file name.
fn run_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string()
}

fn local_destination(dir: &Path, timestamp: &str) -> PathBuf {
    dir.join(format!("{timestamp}_emr_results.csv"))
}

// Jobs
pub async fn map_reduce(aws: ClientConfig, cluster: ClusterArgs, columns: ColumnNames) -> Result<()> {
    let timestamp = run_timestamp();
    let output = S3Path::parse(&cluster.out_s3)?.join(&timestamp)?;
    let input = cluster.input_path()?;

    let step = HadoopStep::new(&cluster.jar_path, vec![input, output.to_string()]);
    let fetcher = CsvResultFetcher::new(
        S3Client::from_conf(aws.clone()),
        Dialect::KeyValue,
        local_destination(&cluster.out_local, &timestamp),
    )
    .columns(columns);

    run_job("MapReduce Job", step.into(), aws, &cluster, output, fetcher).await
}

pub async fn spark(
    aws: ClientConfig,
    cluster: ClusterArgs,
    entry_class: String,
    packages: Vec<String>,
) -> Result<()> {
    let timestamp = run_timestamp();
    let output = S3Path::parse(&cluster.out_s3)?.join(&timestamp)?;
    let input = cluster.input_path()?;

    let step = SparkStep::new(
        &cluster.jar_path,
        entry_class,
        vec![input, output.to_string()],
    )
    .packages(packages);
    let fetcher = CsvResultFetcher::new(
        S3Client::from_conf(aws.clone()),
        Dialect::HeaderCsv,
        local_destination(&cluster.out_local, &timestamp),
    );

    run_job("Spark Job", step.into(), aws, &cluster, output, fetcher).await
}

async fn run_job(
    name: &str,
    step: Step,
    aws: ClientConfig,
    cluster: &ClusterArgs,
    output: S3Path,
    fetcher: CsvResultFetcher<S3Client>,
) -> Result<()> {
    let mut builder = JobSpecBuilder::new(
        name,
        cluster.instance_count,
        &cluster.instance_type,
        &cluster.logs_path,
    );
    builder.add_step(step);
    let spec = builder.build()?;

    if cluster.dry_run {
        println!("{}", serde_json::to_string_pretty(&spec.render())?);
        return Ok(());
    }

    let destination = fetcher.destination().to_path_buf();
    let runner = JobRunner::new(EmrClient::from_conf(aws)).with_fetcher(fetcher);
    let mut run = JobRun::new(spec, output)
        .with_max_wait(Duration::from_secs(cluster.max_wait))
        .with_wait_for_completion(!cluster.no_wait);

    runner.execute(&mut run).await?;

    let job_id = run.job_id().unwrap_or_default();
    match run.state() {
        RunState::Submitted => {
            println!("[Submitted]");
            println!("job: {}", job_id);
            println!("output: {}", run.output_path());
        }
        _ => {
            if let Some(err) = run.fetch_error() {
                return Err(anyhow!("job {} completed, but its results could not be fetched: {}", job_id, err));
            }
            println!("[Completed]");
            println!("job: {}", job_id);
            println!("results: {}", destination.display());
        }
    }

    Ok(())
}

pub async fn fetch(
    aws: ClientConfig,
    output: String,
    dialect: Dialect,
    columns: ColumnNames,
    destination: PathBuf,
) -> Result<()> {
    let output = S3Path::parse(&output)?;
    let store = S3Client::from_conf(aws);

    info!("Fetching results from {}", output);
    let table = fetch_results(&store, &output, dialect, &columns).await?;
    table.save_csv(&destination)?;

    println!("[Fetched]");
    println!("rows: {}", table.len());
    println!("results: {}", destination.display());

    Ok(())
}
