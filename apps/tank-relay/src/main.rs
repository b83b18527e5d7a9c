use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tank_relay::{
    app,
    cli::{self, Cli, Commands, ServeArgs},
    AppState, Config, Relay,
};

#[tokio::main]
async fn main() {
    // RUST_LOG wins; otherwise relay logs at info and HTTP tracing stays quiet.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tank_relay=info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Some(Commands::Control {
            url,
            tank,
            action,
            left,
            right,
        }) => cli::run_control_client(url, tank, action, left, right).await,
        Some(Commands::Watch { url, tank }) => cli::run_watch_client(url, tank).await,
        Some(Commands::Serve(args)) => serve(args).await,
        None => serve(ServeArgs::default()).await,
    };

    if let Err(e) = outcome {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.apply(Config::from_env());
    let addr = config.socket_addr();
    info!("Starting tank relay on {}", addr);
    info!("Serving controller page from {}", config.page_dir.display());

    let state = AppState::new(Relay::new(), config.page_dir.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Tank relay listening on {}", addr);
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("Tank relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
