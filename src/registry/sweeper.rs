use std::sync::Arc;
use std::time::Duration;

use super::registry::JobRegistry;
use super::types::now_ms;

/// Background lease sweeper.
///
/// Runs at half the lease TTL so an expired lease is noticed within one
/// extra half-period at worst. Never exits; spawn it alongside the server.
pub async fn run(registry: Arc<JobRegistry>) {
    let period = Duration::from_millis((registry.config().lease_ttl_ms / 2).max(100));
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        let stats = registry.sweep(now_ms());
        if stats.expired_tasks > 0 || stats.forgotten_workers > 0 {
            tracing::info!(
                "Sweep: {} expired lease(s), {} worker(s) forgotten",
                stats.expired_tasks,
                stats.forgotten_workers
            );
        }
    }
}
