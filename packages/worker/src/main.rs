//! deploy-worker - builds git repositories and publishes their static output
//!
//! Usage:
//!   deploy-worker                                  # Consume the queue (default)
//!   deploy-worker run                              # Same
//!   deploy-worker submit acme/site apps/web        # Enqueue a deployment

mod init;

use clap::{Parser, Subcommand};
use deploy_core::{DeploymentId, DeploymentJob, RepositorySlug, ServicePath};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "deploy-worker")]
#[command(about = "Build-and-publish worker for deploy-from-git", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume deployment messages until interrupted
    Run,

    /// Create a PENDING deployment and enqueue it
    ///
    /// Needs a shared database (DB_ENDPOINT pointing at RocksDB or a server);
    /// the default in-memory database is private to this process.
    Submit {
        /// Repository as owner/name
        repository: String,

        /// Directory inside the repository to build
        #[arg(default_value = ".")]
        service_path: String,

        /// Deployment ID (generated when omitted)
        #[arg(long)]
        deployment_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deploy_worker=debug,pipeline=info,actors=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => init::run_worker().await,
        Commands::Submit {
            repository,
            service_path,
            deployment_id,
        } => {
            let deployment_id = match deployment_id {
                Some(id) => DeploymentId::parse(&id)?,
                None => DeploymentId::generate(),
            };
            let job = DeploymentJob::new(
                RepositorySlug::parse(&repository)?,
                ServicePath::new(&service_path),
                deployment_id,
            );
            init::submit(job).await
        }
    }
}
