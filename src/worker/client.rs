use anyhow::{anyhow, bail, Result};

use crate::api::protocol::*;
use crate::registry::types::{HeartbeatStatus, JobId, TaskAssignment, TaskId};
use crate::store::files::content_hash;

/// Typed HTTP client for the coordinator API.
///
/// Transport-level failures are retried with exponential backoff and jitter;
/// HTTP-level errors are returned to the caller, which turns them into
/// failure reports.
#[derive(Clone)]
pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const REQUEST_ATTEMPTS: usize = 3;

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Startup reachability probe against the coordinator banner.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("coordinator banner returned {}", response.status());
        }
        Ok(())
    }

    pub async fn claim(&self, worker_id: &str) -> Result<Option<TaskAssignment>> {
        let response = self
            .post_with_retry(
                format!("{}{}", self.base_url, ENDPOINT_CLAIM_TASK),
                &ClaimTaskRequest {
                    worker_id: worker_id.to_string(),
                },
            )
            .await?;
        if !response.status().is_success() {
            bail!("claim failed: {}", response.status());
        }
        let body: ClaimTaskResponse = response.json().await?;
        Ok(body.task)
    }

    pub async fn heartbeat(&self, worker_id: &str, task_id: &TaskId) -> Result<HeartbeatStatus> {
        let response = self
            .post_with_retry(
                format!("{}{}", self.base_url, ENDPOINT_HEARTBEAT),
                &HeartbeatRequest {
                    worker_id: worker_id.to_string(),
                    task_id: task_id.clone(),
                },
            )
            .await?;
        if !response.status().is_success() {
            bail!("heartbeat failed: {}", response.status());
        }
        let body: HeartbeatResponse = response.json().await?;
        Ok(body.status)
    }

    /// Reports a task outcome; `Ok(false)` means the coordinator considers
    /// the report stale.
    pub async fn report(
        &self,
        worker_id: &str,
        task_id: &TaskId,
        outcome: TaskOutcome,
    ) -> Result<bool> {
        let response = self
            .post_with_retry(
                format!("{}{}", self.base_url, ENDPOINT_REPORT_TASK),
                &ReportTaskRequest {
                    worker_id: worker_id.to_string(),
                    task_id: task_id.clone(),
                    outcome,
                },
            )
            .await?;
        if !response.status().is_success() {
            bail!("report failed: {}", response.status());
        }
        let body: ReportTaskResponse = response.json().await?;
        Ok(body.accepted)
    }

    /// Downloads an artifact and verifies it against the coordinator's
    /// content hash.
    pub async fn download_artifact(&self, job_id: &JobId, name: &str) -> Result<Vec<u8>> {
        let url = format!("{}{}/{}/{}", self.base_url, ENDPOINT_ARTIFACT, job_id.0, name);
        let response = self.get_with_retry(url).await?;
        if !response.status().is_success() {
            bail!("download of {} failed: {}", name, response.status());
        }

        let expected = response
            .headers()
            .get(HEADER_ARTIFACT_SHA256)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let bytes = response.bytes().await?.to_vec();

        if let Some(expected) = expected {
            let actual = content_hash(&bytes);
            if actual != expected {
                bail!(
                    "hash mismatch for {}: expected {}, got {}",
                    name,
                    expected,
                    actual
                );
            }
        }

        Ok(bytes)
    }

    pub async fn upload_artifact(&self, job_id: &JobId, name: &str, bytes: Vec<u8>) -> Result<()> {
        let url = format!("{}{}/{}/{}", self.base_url, ENDPOINT_ARTIFACT, job_id.0, name);

        let mut delay_ms = 150u64;
        for attempt in 0..REQUEST_ATTEMPTS {
            let response = self
                .http
                .put(url.clone())
                .body(bytes.clone())
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => bail!("upload of {} failed: {}", name, resp.status()),
                Err(e) => {
                    if attempt + 1 == REQUEST_ATTEMPTS {
                        return Err(anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow!("retry attempts exhausted"))
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..REQUEST_ATTEMPTS {
            let response = self
                .http
                .post(url.clone())
                .json(payload)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == REQUEST_ATTEMPTS {
                        return Err(anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow!("retry attempts exhausted"))
    }

    async fn get_with_retry(&self, url: String) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..REQUEST_ATTEMPTS {
            let response = self
                .http
                .get(url.clone())
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == REQUEST_ATTEMPTS {
                        return Err(anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow!("retry attempts exhausted"))
    }
}
