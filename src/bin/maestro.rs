use clap::Parser;
use tokio_util::sync::CancellationToken;

use maestro::{Cli, bootstrap};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    bootstrap::init_tracing(&cli)?;

    let service = bootstrap::build(&cli).await?;

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("shutdown requested");
            token.cancel();
        });
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "maestro starting");
    service.run(token).await
}
