use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use solbridge::api;
use solbridge::config::Config;
use solbridge::jobs::ReconciliationWorker;
use solbridge::mcp::McpServer;
use solbridge::{Error, Services};

#[derive(Parser)]
#[command(name = "solbridge", version, about = "Solana wallet bridge for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the wallet-side HTTP gateway.
    Serve,
    /// Run the agent-side MCP server on stdio.
    Mcp {
        /// Stable actor identifier for this conversation. Defaults to
        /// `ACTOR_ID` from the environment, else a generated id.
        #[arg(long, env = "ACTOR_ID")]
        actor_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Stdout belongs to the MCP protocol in mcp mode; logs always go to
    // stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solbridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().map_err(Error::from)?;

    tracing::info!(
        rpc_url = %config.solana.rpc_url,
        database = %config.database.path.display(),
        "solbridge starting"
    );

    let services = Services::from_config(config).await?;

    // Background reconciliation runs next to every frontend.
    let worker = ReconciliationWorker::new(
        Arc::clone(&services.store),
        Arc::clone(&services.authorizer),
    );
    tokio::spawn(worker.run());

    match cli.command {
        Command::Serve => api::serve(services).await,
        Command::Mcp { actor_id } => {
            let actor_id = actor_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            McpServer::new(services, actor_id).run().await
        }
    }
}
