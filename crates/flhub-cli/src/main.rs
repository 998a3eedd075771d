use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use flhub_mailer::{Mailer, MailerConfig, ResendMailer};
use flhub_notify::NotificationService;
use flhub_store::{AuthProvider, OpportunityStore, RestAuth, RestStore, StoreConfig};
use flhub_web::AppState;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "flhub")]
#[command(about = "Freelancer Hub notification service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API server.
    Serve,
    /// Run one notification pass for the given opportunity ids.
    Notify {
        /// Comma-separated opportunity ids to evaluate.
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store_config = StoreConfig::from_env();
    let store: Arc<dyn OpportunityStore> = Arc::new(RestStore::new(store_config.clone())?);
    let mailer: Arc<dyn Mailer> = Arc::new(ResendMailer::new(MailerConfig::from_env())?);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let auth: Arc<dyn AuthProvider> = Arc::new(RestAuth::new(store_config)?);
            let state = AppState {
                store,
                auth,
                mailer,
            };
            flhub_web::serve_from_env(state).await?;
        }
        Commands::Notify { ids } => {
            let service = NotificationService::new(store, mailer);
            let summary = service.run(&ids).await?;
            println!(
                "notification run complete: matched_users={} deliveries={}",
                summary.notifications_sent,
                summary.deliveries.len()
            );
        }
    }

    Ok(())
}
