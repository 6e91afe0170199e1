use std::sync::Arc;
use std::time::Duration;

use crowd_compute::worker::agent::WorkerAgent;
use crowd_compute::worker::client::CoordinatorClient;
use crowd_compute::worker::config::WorkerConfig;
use crowd_compute::worker::plugins::PluginRegistry;
use crowd_compute::worker::runtime::DockerCli;

/// Exit codes: 0 graceful shutdown, 2 fatal configuration error,
/// 3 coordinator unreachable at startup.
const EXIT_CONFIG: i32 = 2;
const EXIT_UNREACHABLE: i32 = 3;

const STARTUP_PING_ATTEMPTS: u32 = 10;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cfg = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(msg) => {
            eprintln!("Configuration error: {}", msg);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let client = CoordinatorClient::new(&cfg.coordinator_url);
    if !wait_for_coordinator(&client).await {
        tracing::error!(
            "Coordinator {} unreachable after {} attempts",
            cfg.coordinator_url,
            STARTUP_PING_ATTEMPTS
        );
        std::process::exit(EXIT_UNREACHABLE);
    }

    let data_dir = cfg.data_dir.clone();
    let agent = WorkerAgent::new(cfg, client, PluginRegistry::builtin(), Arc::new(DockerCli));

    tokio::select! {
        result = agent.run() => {
            if let Err(e) = result {
                tracing::error!("Worker loop ended: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down, removing {:?}", data_dir);
            let _ = tokio::fs::remove_dir_all(&data_dir).await;
        }
    }
}

/// Probes the coordinator banner with growing delays.
async fn wait_for_coordinator(client: &CoordinatorClient) -> bool {
    let mut delay = Duration::from_millis(500);
    for attempt in 1..=STARTUP_PING_ATTEMPTS {
        match client.ping().await {
            Ok(()) => return true,
            Err(e) => {
                tracing::warn!(
                    "Coordinator not reachable (attempt {}/{}): {:#}",
                    attempt,
                    STARTUP_PING_ATTEMPTS,
                    e
                );
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(10));
    }
    false
}
