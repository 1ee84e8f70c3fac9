use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use signalk_core::Settings;
use signalk_protocol::builtin_encoders;
use signalk_providers::{
    AppContext, PipelineComposer, ProviderError, ProviderHandle, StageRegistry,
};
use signalk_server::{outbound_channel, spawn_encoders, EventBus, NmeaTcpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SETTINGS: &str = "settings.json";

/// Settings file: first argument, then `SIGNALK_SETTINGS`, then the default.
fn settings_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("SIGNALK_SETTINGS"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,signalk_server=debug,signalk_providers=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("SignalK gateway starting...");

    let path = settings_path();
    let settings = Settings::load(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    let self_urn = settings.vessel.self_urn();
    tracing::info!("Self vessel: {}", self_urn);

    let bus = Arc::new(EventBus::new(self_urn.clone()));

    // NMEA 0183 output
    let outbound = outbound_channel();
    let encoder_handles = spawn_encoders(&bus, builtin_encoders(), &outbound);

    let tcp_handle = if settings.nmea0183_tcp.enabled {
        let addr = format!("0.0.0.0:{}", settings.nmea0183_tcp.port);
        let server = NmeaTcpServer::bind(addr, outbound.clone()).await?;
        Some(tokio::spawn(server.run()))
    } else {
        tracing::info!("NMEA 0183 TCP output disabled");
        None
    };

    // Providers
    let app = AppContext {
        self_urn,
        logging_directory: settings.logging_directory.as_ref().map(PathBuf::from),
    };
    let composer = PipelineComposer::new(StageRegistry::with_builtins(), app);

    let mut providers = Vec::new();
    for provider in settings.enabled_providers() {
        let built = provider
            .to_config()
            .map_err(ProviderError::from)
            .and_then(|config| composer.build(&config));
        let pipeline = match built {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!("Provider {} not started: {}", provider.id, e);
                continue;
            }
        };

        let bus = bus.clone();
        match ProviderHandle::spawn(pipeline, move |delta| {
            bus.push_delta(&delta);
        }) {
            Ok(handle) => providers.push(handle),
            Err(e) => tracing::error!("Provider {} not started: {}", provider.id, e),
        }
    }

    tracing::info!("SignalK gateway ready with {} providers", providers.len());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down...");

    for provider in &providers {
        provider.stop();
    }
    for provider in providers {
        let id = provider.id().to_string();
        let forwarded = provider.join().await;
        tracing::info!("Provider {} stopped after {} deltas", id, forwarded);
    }

    // Encoders end once the bus is gone.
    drop(bus);
    for handle in encoder_handles {
        let _ = handle.await;
    }
    if let Some(handle) = tcp_handle {
        handle.abort();
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
