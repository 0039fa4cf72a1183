use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use cronwell_core::config::CronwellConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod app;
mod http;

const DEFAULT_FILTER: &str =
    "cronwell_daemon=info,cronwell_scheduler=info,cronwell_cluster=info,tower_http=debug";

#[derive(Debug, Parser)]
#[command(name = "cronwell-daemon", version, about = "Clustered job scheduler")]
struct Cli {
    /// Config file. Falls back to CRONWELL_CONFIG, then ~/.cronwell/cronwell.toml.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = CronwellConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CronwellConfig::default()
    });
    // Pin the generated instance id so every component sees the same one.
    config.service.instance_id = Some(config.instance_id());

    let addr: SocketAddr = format!("{}:{}", config.service.bind, config.cluster.port).parse()?;
    let facade = Arc::new(app::build_facade(config)?);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("cronwell cluster rpc listening on {}", addr);

    let stop = CancellationToken::new();
    let mut server = tokio::spawn({
        let router = app::build_router(facade.clone());
        let stop = stop.clone();
        async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        }
    });

    if let Err(e) = facade.start().await {
        error!("startup failed: {e}");
        facade.shutdown().await;
        stop.cancel();
        let _ = server.await;
        return Err(e.into());
    }

    let server_exited = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("failed to listen for shutdown signal: {e}");
            }
            info!("shutdown signal received");
            false
        }
        result = &mut server => {
            error!("cluster rpc server exited: {result:?}");
            true
        }
    };

    facade.shutdown().await;
    stop.cancel();
    if !server_exited {
        server.await??;
    }
    info!("cronwell daemon stopped");
    Ok(())
}
