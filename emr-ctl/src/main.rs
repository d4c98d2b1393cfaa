mod args;
use args::{column_names, parse_args, Commands};

mod core;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();
    let aws: common::ClientConfig = args.aws.into();

    match args.command {
        Commands::MapReduce { cluster, columns } => {
            core::map_reduce(aws, cluster, column_names(columns)).await?
        }
        Commands::Spark {
            cluster,
            entry_class,
            packages,
        } => core::spark(aws, cluster, entry_class, packages).await?,
        Commands::Fetch {
            output,
            dialect,
            columns,
            destination,
        } => core::fetch(aws, output, dialect.into(), column_names(columns), destination).await?,
    }

    Ok(())
}
