use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tabcast::{
    create_router, normalize, AppState, Config, ManagerConfig, SessionManager, SinkServer,
    WavFileBackend, WebSocketConnector,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tabcast", version, about = "Stream tab audio captures to a local sink")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, global = true, default_value = "config/tabcast")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the session manager and its control API
    Serve,
    /// Run the receiving sink that stores streamed audio as WAV files
    Sink,
    /// Print the resource identity of a URL
    Normalize { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Sink => SinkServer::new(cfg.sink).run().await,
        Command::Normalize { url } => {
            println!("{}", normalize(&url));
            Ok(())
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    info!("tabcast v{}", env!("CARGO_PKG_VERSION"));
    info!("Sessions stream to {}", cfg.sink.endpoint);
    info!("Capture source: {}", cfg.capture.source_path.display());

    let (manager, manager_task) = SessionManager::spawn(
        ManagerConfig::from(&cfg),
        Arc::new(WavFileBackend::new(cfg.capture.source_path.clone())),
        Arc::new(WebSocketConnector),
    );

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind control API on {}", addr))?;
    info!("Control API listening on http://{}", addr);

    let app = create_router(AppState::new(manager.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Control API failed")?;

    // Process suspend: release every capture and connection.
    manager.shutdown().await?;
    manager_task.await.context("Session manager panicked")?;

    Ok(())
}
