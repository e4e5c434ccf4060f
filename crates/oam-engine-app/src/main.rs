use std::env;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oam_engine_app::cli::{Cli, Commands};
use oam_engine_app::reconcile;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { app, definitions } => reconcile::validate_command(&app, &definitions).await,
        Commands::Render { app, definitions, out_dir } => {
            reconcile::render_command(&app, &definitions, out_dir.as_deref()).await
        }
        Commands::Run { app, definitions, max_ticks } => {
            reconcile::run_command(&app, &definitions, max_ticks).await
        }
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "command failed");
        std::process::exit(1);
    }
}
