use std::path::PathBuf;
use std::time::Duration;

/// Worker agent configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub coordinator_url: String,
    pub worker_id: String,
    /// Base poll interval; the idle backoff starts here and doubles.
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub lease_ttl: Duration,
    pub data_dir: PathBuf,
}

impl WorkerConfig {
    /// Reads the configuration; an `Err` is a fatal configuration problem
    /// (exit code 2 territory).
    pub fn from_env() -> Result<Self, String> {
        let coordinator_url =
            std::env::var("COORDINATOR_URL").map_err(|_| "COORDINATOR_URL is required".to_string())?;

        let worker_id = std::env::var("WORKER_ID")
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(default_worker_id);

        Ok(Self {
            coordinator_url,
            worker_id,
            poll_interval: Duration::from_millis(env_ms("POLL_INTERVAL_MS", 1_000)?),
            max_poll_interval: Duration::from_millis(env_ms("MAX_POLL_INTERVAL_MS", 10_000)?),
            lease_ttl: Duration::from_millis(env_ms("LEASE_TTL_MS", 30_000)?),
            data_dir: std::env::var("WORKER_DATA_DIR")
                .unwrap_or_else(|_| "worker_data".to_string())
                .into(),
        })
    }

    /// Heartbeats run at a third of the lease TTL so two can be lost before
    /// the lease lapses.
    pub fn heartbeat_period(&self) -> Duration {
        self.lease_ttl / 3
    }
}

fn env_ms(name: &str, default: u64) -> Result<u64, String> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("{} must be an integer, got {:?}", name, raw)),
    }
}

/// Host-unique default id: `<hostname>-<uuid prefix>`.
fn default_worker_id() -> String {
    let host = hostname::get()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|_| "worker".to_string());
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &nonce[..8])
}
