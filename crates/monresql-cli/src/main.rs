use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::FutureExt;
use monresql::{FieldMap, FullReplicateOptions, MongoOplogSource, SyncOptions};

/// monresql tails a MongoDB replica set's oplog and mirrors it into Postgres.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Connection string of the MongoDB replica set.
    #[clap(long = "mongo", env = "MONGO_URL")]
    mongo_url: String,
    /// URL of the destination Postgres database.
    #[clap(long = "database", env = "DATABASE_URL")]
    database_url: String,
    /// Path to the field-mapping configuration file.
    #[clap(long = "field-map", env = "FIELD_MAP")]
    field_map: std::path::PathBuf,
    /// Name this sync checkpoints under in `monresql_metadata`.
    #[clap(long = "name", default_value = "monresql")]
    name: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Continuously tails the oplog until interrupted.
    Sync,
    /// Replicates every configured collection once and exits.
    Replicate,
}

fn main() -> ExitCode {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "monresql exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let field_map = Arc::new(FieldMap::from_path(&args.field_map).context("loading field map")?);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&args.database_url)
        .await
        .context("connecting to postgres")?;

    let executed = monresql::validate_or_create_postgres_table(&field_map, &pool)
        .await
        .context("validating schema")?;
    for sql in executed {
        tracing::info!(%sql, "applied schema change");
    }

    let client_options = mongodb::options::ClientOptions::parse(&args.mongo_url)
        .await
        .context("parsing mongo connection string")?;
    let client = mongodb::Client::with_options(client_options).context("connecting to mongodb")?;
    let source = MongoOplogSource::new(client);

    match args.command {
        Command::Sync => {
            let handle = monresql::sync(field_map, pool, source, args.name.clone(), SyncOptions::default());
            tokio::signal::ctrl_c().map(|_| ()).await;
            tracing::info!("received interrupt, stopping tail");
            handle.stop();
            handle.join().await;
            Ok(())
        }
        Command::Replicate => {
            let summary = monresql::replicate(field_map, pool, source, &args.name, FullReplicateOptions::default())
                .await
                .context("full replication failed")?;
            for collection in &summary.collections {
                tracing::info!(
                    fan_key = %collection.fan_key,
                    applied = collection.applied,
                    errors = collection.errors,
                    skipped = collection.skipped,
                    "collection replicated"
                );
            }
            if summary.total_errors() > 0 {
                anyhow::bail!("replication finished with {} errors", summary.total_errors());
            }
            Ok(())
        }
    }
}
