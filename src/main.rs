//! haulnet service entry point.
//!
//! Wiring order: config -> logging -> engine (stores, bus, scheduler,
//! services) -> background jobs -> gateway. Ctrl-C triggers a graceful
//! shutdown that cancels timers and drains the push outbox.

use std::sync::Arc;

use haulnet::config::ServiceConfig;
use haulnet::engine::DispatchEngine;
use haulnet::events::{FcmSender, NoopSender, PushSender};
use haulnet::gateway;
use haulnet::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("HAULNET_CONFIG").unwrap_or_else(|_| "config/haulnet.yaml".to_string());
    let config = match ServiceConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config {config_path} not loaded ({e}), using defaults");
            ServiceConfig::default()
        }
    };

    let _log_guard = init_logging(&config.app);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        config = %config_path,
        "haulnet starting"
    );

    let push_sender: Arc<dyn PushSender> = match &config.app.fcm {
        Some(fcm) => {
            tracing::info!(endpoint = %fcm.endpoint, "FCM push delivery enabled");
            Arc::new(FcmSender::new(fcm))
        }
        None => {
            tracing::warn!("no FCM config, push notifications are logged only");
            Arc::new(NoopSender)
        }
    };

    // Single-process deployment: in-memory store and cache. A multi-node
    // install plugs shared implementations into the same traits.
    let engine = DispatchEngine::in_memory_with_push(config.engine.clone(), push_sender);
    engine.start().await?;

    let server_engine = engine.clone();
    let listen_addr = config.app.listen_addr.clone();
    let server = tokio::spawn(async move { gateway::run_server(&listen_addr, server_engine).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    engine.shutdown().await;
    server.abort();
    Ok(())
}
