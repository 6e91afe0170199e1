use std::net::SocketAddr;
use std::sync::Arc;

use crowd_compute::api::handlers::build_router;
use crowd_compute::registry::registry::{JobRegistry, RegistryConfig};
use crowd_compute::registry::sweeper;
use crowd_compute::store::files::ArtifactStore;
use crowd_compute::worker::plugins::PluginRegistry;

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let storage_root =
        std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "file_storage".to_string());
    let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        .parse()?;

    let registry_cfg = RegistryConfig {
        lease_ttl_ms: env_u64("LEASE_TTL_MS", 30_000),
        worker_ttl_ms: env_u64("WORKER_TTL_MS", 60_000),
        max_retries: env_u64("MAX_RETRIES", 3) as u32,
        retry_cooldown_ms: env_u64("RETRY_COOLDOWN_MS", 5_000),
    };

    tracing::info!("Storage root: {}", storage_root);
    tracing::info!(
        "Lease ttl {}ms, worker ttl {}ms, max retries {}",
        registry_cfg.lease_ttl_ms,
        registry_cfg.worker_ttl_ms,
        registry_cfg.max_retries
    );

    let store = Arc::new(ArtifactStore::new(storage_root.as_str())?);
    let registry = JobRegistry::new(registry_cfg);
    let plugins = PluginRegistry::builtin();

    // Background lease sweeper.
    let sweep_registry = registry.clone();
    tokio::spawn(async move {
        sweeper::run(sweep_registry).await;
    });

    let max_body_bytes = std::env::var("MAX_BODY_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(64 * 1024 * 1024);

    let app = build_router(registry, store, plugins, max_body_bytes);

    tracing::info!("Coordinator listening on {}", listen_addr);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
