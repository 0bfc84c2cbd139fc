use nowplaying_plugin::artwork::ArtworkFetcher;
use nowplaying_plugin::backend;
use nowplaying_plugin::canvas::CanvasRenderer;
use nowplaying_plugin::clock::SystemClock;
use nowplaying_plugin::engine::{self, Engine, EngineEvent};
use nowplaying_plugin::host;
use nowplaying_plugin::logging;
use nowplaying_proto::config::Config;
use nowplaying_proto::protocol::PluginCommand;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Host channel first so logging can forward into it
    let (host_tx, _) = broadcast::channel::<PluginCommand>(256);

    let config = Config::load()?;
    logging::init(&config.logging, host_tx.clone())?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel: all inputs funnel into the engine
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(256);

    let source = backend::build_source(&config)?;
    info!("Using {} backend", source.name());

    let cancel = CancellationToken::new();
    if let Some(push_rx) = source.subscribe_state_changes(cancel.clone()) {
        let _push_handle = engine::forward_push(push_rx, event_tx.clone());
    }

    let engine = Engine::new(
        source,
        Box::new(CanvasRenderer::new()),
        Arc::new(SystemClock),
        config.timing,
        event_tx.clone(),
        host_tx.clone(),
    )
    .with_artwork(ArtworkFetcher::new()?);

    let _host_handle = host::start_server(
        config.host.bind_address.clone(),
        config.host.port,
        event_tx.clone(),
        host_tx.clone(),
    );

    let shutdown_tx = event_tx.clone();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Ctrl-C received, shutting down");
        shutdown_cancel.cancel();
        let _ = shutdown_tx.send(EngineEvent::Shutdown).await;
    });

    engine.run(event_rx).await?;
    cancel.cancel();
    Ok(())
}
