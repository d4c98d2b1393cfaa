use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use common::{ClientConfig, ColumnNames, Dialect};

//
// For parsing user specified command.
//
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub aws: AwsArgs,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Debug)]
pub struct AwsArgs {
    /// AWS access key id.
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: String,

    /// AWS secret access key.
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: String,

    /// AWS region, e.g. eu-central-1.
    #[arg(long, env = "AWS_REGION")]
    pub region: String,

    /// Custom S3 endpoint.
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,
}

impl From<AwsArgs> for ClientConfig {
    fn from(args: AwsArgs) -> Self {
        ClientConfig {
            access_key_id: args.access_key_id,
            secret_access_key: args.secret_access_key,
            region: args.region,
            endpoint_url: args.endpoint_url,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ClusterArgs {
    /// S3 path of the application jar.
    #[arg(long, env = "EMR_JAR_PATH")]
    pub jar_path: String,

    /// S3 path for the cluster logs.
    #[arg(long, env = "EMR_LOGS_PATH")]
    pub logs_path: String,

    /// Input data: `test`, `prod`, or an S3 path.
    #[arg(short, long, env = "EMR_INPUT_PATH", default_value = "test")]
    pub input: String,

    /// S3 path used for `--input test`.
    #[arg(long, env = "EMR_TEST_INPUT_PATH")]
    pub test_input: Option<String>,

    /// S3 path used for `--input prod`.
    #[arg(long, env = "EMR_PROD_INPUT_PATH")]
    pub prod_input: Option<String>,

    /// S3 directory under which each run writes its output.
    #[arg(long, env = "EMR_OUTPUT_PATH")]
    pub out_s3: String,

    /// Local directory for the result CSV.
    #[arg(long, env = "EMR_LOCAL_OUTPUT", default_value = ".")]
    pub out_local: PathBuf,

    /// EMR instance type, used for master and slave instances.
    #[arg(long, default_value = "m4.large")]
    pub instance_type: String,

    /// Number of instances in the cluster.
    #[arg(long, default_value_t = 3)]
    pub instance_count: u32,

    /// Seconds to wait for each step.
    #[arg(long, default_value_t = 900)]
    pub max_wait: u64,

    /// Return as soon as the job is submitted.
    #[arg(long)]
    pub no_wait: bool,

    /// Print the job request instead of submitting it.
    #[arg(long)]
    pub dry_run: bool,
}

impl ClusterArgs {
    /// Resolve the `test` and `prod` presets to their S3 paths.
    pub fn input_path(&self) -> anyhow::Result<String> {
        let preset = match self.input.as_str() {
            "test" => &self.test_input,
            "prod" => &self.prod_input,
            path => return Ok(path.to_string()),
        };

        preset.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "no S3 path configured for `--input {}`, set --{}-input",
                self.input,
                self.input
            )
        })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectArg {
    /// MapReduce `key<TAB>v1, v2` lines.
    KeyValue,
    /// CSV with a header row, as written by Spark.
    Csv,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::KeyValue => Dialect::KeyValue,
            DialectArg::Csv => Dialect::HeaderCsv,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a MapReduce jar and save its results as CSV.
    MapReduce {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Names of the value columns. Defaults to 0, 1, 2...
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
    /// Run a Spark application and save its results as CSV.
    Spark {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Main class of the application.
        #[arg(long = "class")]
        entry_class: String,

        /// Maven coordinates of extra packages.
        #[arg(long, value_delimiter = ',')]
        packages: Vec<String>,
    },
    /// Fetch the results of an earlier run.
    Fetch {
        /// S3 directory the job wrote to.
        #[arg(short, long)]
        output: String,

        /// Format of the part files.
        #[arg(long, value_enum, default_value_t = DialectArg::KeyValue)]
        dialect: DialectArg,

        /// Names of the value columns, key/value output only.
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Local CSV file to write.
        #[arg(short, long)]
        destination: PathBuf,
    },
}

/// Empty means positional names.
pub fn column_names(columns: Vec<String>) -> ColumnNames {
    if columns.is_empty() {
        ColumnNames::Positional
    } else {
        ColumnNames::Named(columns)
    }
}

/// Parse user command.
pub fn parse_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    const AWS: [&str; 7] = [
        "emr-ctl",
        "--access-key-id",
        "id",
        "--secret-access-key",
        "secret",
        "--region",
        "eu-central-1",
    ];

    const CLUSTER: [&str; 8] = [
        "--jar-path",
        "s3://jars/app.jar",
        "--logs-path",
        "s3://logs/",
        "--input",
        "s3://data/in",
        "--out-s3",
        "s3://data/out",
    ];

    fn parse(rest: &[&str]) -> Args {
        let argv: Vec<&str> = AWS.iter().chain(rest).copied().collect();
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn map_reduce_with_columns() {
        let mut rest = vec!["map-reduce", "--columns", "min,max,average,count"];
        rest.extend(CLUSTER);
        let args = parse(&rest);

        match args.command {
            Commands::MapReduce { cluster, columns } => {
                assert_eq!(columns, vec!["min", "max", "average", "count"]);
                assert_eq!(cluster.instance_type, "m4.large");
                assert_eq!(cluster.instance_count, 3);
                assert_eq!(cluster.max_wait, 900);
                assert!(!cluster.no_wait);
                assert!(!cluster.dry_run);
                assert_eq!(cluster.input_path().unwrap(), "s3://data/in");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(args.aws.region, "eu-central-1");
    }

    #[test]
    fn spark_with_packages() {
        let mut rest = vec![
            "spark",
            "--class",
            "analysis.MaxTemperatureApp",
            "--packages",
            "com.databricks:spark-csv_2.11:1.5.0",
            "--no-wait",
        ];
        rest.extend(CLUSTER);

        match parse(&rest).command {
            Commands::Spark {
                cluster,
                entry_class,
                packages,
            } => {
                assert_eq!(entry_class, "analysis.MaxTemperatureApp");
                assert_eq!(packages, vec!["com.databricks:spark-csv_2.11:1.5.0"]);
                assert!(cluster.no_wait);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn input_presets() {
        let args = parse(&[
            "map-reduce",
            "--jar-path",
            "s3://jars/app.jar",
            "--logs-path",
            "s3://logs/",
            "--out-s3",
            "s3://data/out",
            "--input",
            "prod",
            "--test-input",
            "s3://data/sample",
            "--prod-input",
            "s3://data/full",
        ]);

        match args.command {
            Commands::MapReduce { mut cluster, .. } => {
                assert_eq!(cluster.input_path().unwrap(), "s3://data/full");

                cluster.input = "test".to_string();
                assert_eq!(cluster.input_path().unwrap(), "s3://data/sample");

                cluster.test_input = None;
                let err = cluster.input_path().unwrap_err();
                assert!(err.to_string().contains("--test-input"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn fetch_csv() {
        let args = parse(&[
            "fetch",
            "--output",
            "s3://data/out/run",
            "--dialect",
            "csv",
            "--destination",
            "results.csv",
        ]);

        match args.command {
            Commands::Fetch {
                dialect, columns, ..
            } => {
                assert_eq!(Dialect::from(dialect), Dialect::HeaderCsv);
                assert_eq!(column_names(columns), ColumnNames::Positional);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
