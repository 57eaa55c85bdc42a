use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mnemo::{
    build_state,
    config::MemoryConfig,
    observability::{self, metrics},
    routes, spawn_background_jobs,
};

#[derive(Parser)]
#[command(name = "mnemo", version, about = "Conversation memory service for LLM agent platforms")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "mnemo.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the service (default).
    Serve,
    /// Run database migrations and exit.
    Migrate,
    /// Parse and validate the configuration, then exit.
    CheckConfig,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match MemoryConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if matches!(cli.command, Some(Command::CheckConfig)) {
        println!("configuration ok");
        return std::process::ExitCode::SUCCESS;
    }

    observability::init_tracing(&config.observability.logging);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return std::process::ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(Command::Migrate) => runtime.block_on(migrate(config)),
        _ => runtime.block_on(serve(config)),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn migrate(config: MemoryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db = mnemo::db::DbPool::from_config(&config.database).await?;
    db.run_migrations().await?;
    info!("Migrations complete");
    Ok(())
}

async fn serve(config: MemoryConfig) -> Result<(), Box<dyn std::error::Error>> {
    metrics::init_metrics(&config.observability.metrics)?;

    let (state, background) = build_state(config).await?;
    let config = state.config.clone();

    let shutdown = CancellationToken::new();
    spawn_background_jobs(background, config.retention.enabled, &shutdown);

    // Shutdown on SIGINT/SIGTERM; workers and listeners drain from the
    // same token.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received; draining");
            shutdown.cancel();
        });
    }

    #[cfg(feature = "grpc")]
    {
        let grpc_addr = SocketAddr::new(config.server.host, config.server.grpc_port);
        let grpc_state = state.clone();
        let grpc_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = mnemo::grpc::serve(grpc_state, grpc_addr, grpc_shutdown).await {
                error!(error = %e, "gRPC listener failed");
            }
        });
    }

    if let Some(port) = config.server.management_port {
        let addr = SocketAddr::new(config.server.host, port);
        let router = routes::build_management_router(state.clone());
        info!(%addr, "Starting management listener");
        tokio::spawn(async move {
            if let Err(e) =
                axum_server::bind(addr).serve(router.into_make_service()).await
            {
                error!(error = %e, "Management listener failed");
            }
        });
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let router = routes::build_router(state);

    let handle = axum_server::Handle::new();
    {
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(Some(std::time::Duration::from_secs(15)));
        });
    }

    match &config.server.tls {
        Some(tls) => {
            info!(%addr, "Starting HTTPS listener");
            let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                &tls.cert_path,
                &tls.key_path,
            )
            .await?;
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(router.into_make_service())
                .await?;
        }
        None => {
            info!(%addr, "Starting HTTP listener");
            axum_server::bind(addr)
                .handle(handle)
                .serve(router.into_make_service())
                .await?;
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
