//! Cache Coherence host
//!
//! Runs the subsystem as a single execution context with a diagnostics HTTP
//! surface, periodic persistence and gcTime collection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache_coherence::api::{create_router, AppState};
use cache_coherence::broadcast::{BroadcastSync, LocalChannelHub};
use cache_coherence::persist::{FileDurableStore, Persister};
use cache_coherence::{spawn_gc_task, spawn_persist_task, Config};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the cache, channel hub and handle registry
/// 4. Restore the persisted snapshot
/// 5. Start the refresh watcher, gc and persist tasks
/// 6. Serve the diagnostics API until SIGINT/SIGTERM
/// 7. Persist a final snapshot and release every handle
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cache_coherence=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cache coherence host");

    let config = Config::from_env();
    info!(
        "Configuration loaded: stale_time={}ms, gc_time={}ms, channel={}, port={}",
        config.default_stale_time_ms, config.default_gc_time_ms, config.sync_channel, config.server_port
    );

    let hub = LocalChannelHub::default();
    let transport = hub.context("host");
    info!("Joined channel hub as context '{}'", transport.context_id());
    let sync = BroadcastSync::new(Arc::new(transport));
    let state = AppState::from_config(&config, sync);
    info!(
        "Serving media from {} (cap {} payloads, idle release {}ms)",
        config.media_root.display(),
        config.media_max_entries,
        config.media_idle_release_ms
    );

    let store = Arc::new(FileDurableStore::new(&config.persist_path));
    let persister = Arc::new(Persister::from_config(store, &config));
    let restored = persister
        .restore_into(state.cache.as_ref(), config.default_gc_time_ms)
        .await;
    info!("Cache warmed with {} persisted entries", restored);

    let watcher = state.watcher.clone().spawn();
    let gc_handle = spawn_gc_task(state.cache.clone(), config.gc_interval);
    let persist_handle =
        spawn_persist_task(state.cache.clone(), persister.clone(), config.persist_interval);
    info!("Background tasks started");

    let cache = state.cache.clone();
    let handles = state.handles.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving diagnostics API")?;

    gc_handle.abort();
    persist_handle.abort();
    drop(watcher);
    warn!("Background tasks aborted");

    // Unload boundary: one last snapshot.
    if persister.persist_cache(cache.as_ref()).await {
        info!("Final snapshot persisted");
    }
    let released = handles.release_all();
    info!("Released {} media handles, shutdown complete", released);
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
