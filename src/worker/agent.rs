use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use super::client::CoordinatorClient;
use super::config::WorkerConfig;
use super::plugins::PluginRegistry;
use super::runtime::{ContainerRuntime, ContainerSpec};
use crate::api::protocol::TaskOutcome;
use crate::registry::types::{ErrorKind, HeartbeatStatus, TaskAssignment, TaskId};

/// How a task attempt ended, before anything is said to the coordinator.
enum TaskEnd {
    /// Outputs are uploaded; report success with these artifact names.
    Completed(Vec<String>),
    /// Report a failure and let the coordinator decide on retries.
    Failed(ErrorKind, String),
    /// Say nothing: either the coordinator reassigned the task, or it is
    /// unreachable and the lease sweeper will requeue the task anyway.
    Abandoned(String),
}

/// The polling worker agent. Processes one task at a time.
pub struct WorkerAgent<R> {
    cfg: WorkerConfig,
    client: CoordinatorClient,
    plugins: Arc<PluginRegistry>,
    runtime: Arc<R>,
}

impl<R: ContainerRuntime> WorkerAgent<R> {
    pub fn new(
        cfg: WorkerConfig,
        client: CoordinatorClient,
        plugins: Arc<PluginRegistry>,
        runtime: Arc<R>,
    ) -> Self {
        Self {
            cfg,
            client,
            plugins,
            runtime,
        }
    }

    /// Main loop: claim, execute, report, forever. Idle polls back off
    /// exponentially with jitter up to the configured cap; any claimed task
    /// resets the backoff.
    pub async fn run(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.cfg.data_dir).await?;
        tracing::info!(
            "Worker {} polling {} (lease ttl {:?})",
            self.cfg.worker_id,
            self.client.base_url(),
            self.cfg.lease_ttl
        );

        let mut backoff = self.cfg.poll_interval;
        loop {
            match self.client.claim(&self.cfg.worker_id).await {
                Ok(Some(assignment)) => {
                    self.process(assignment).await;
                    backoff = self.cfg.poll_interval;
                }
                Ok(None) => {
                    tracing::debug!("No task available, sleeping {:?}", backoff);
                    sleep_with_jitter(backoff).await;
                    backoff = (backoff * 2).min(self.cfg.max_poll_interval);
                }
                Err(e) => {
                    tracing::warn!("Claim failed: {:#}", e);
                    sleep_with_jitter(backoff).await;
                    backoff = (backoff * 2).min(self.cfg.max_poll_interval);
                }
            }
        }
    }

    async fn process(&self, assignment: TaskAssignment) {
        let task_id = assignment.task_id.clone();
        tracing::info!(
            "Claimed task {} (job {}, plugin {})",
            task_id.0,
            assignment.job_id.0,
            assignment.plugin_kind
        );

        let scratch = self.cfg.data_dir.join(&task_id.0);
        let end = self.execute(&assignment, &scratch).await;

        match end {
            TaskEnd::Completed(outputs) => {
                match self
                    .client
                    .report(&self.cfg.worker_id, &task_id, TaskOutcome::Success { outputs })
                    .await
                {
                    Ok(true) => tracing::info!("Task {} completed", task_id.0),
                    Ok(false) => {
                        tracing::warn!("Success report for task {} was stale", task_id.0)
                    }
                    Err(e) => tracing::warn!("Failed to report task {}: {:#}", task_id.0, e),
                }
            }
            TaskEnd::Failed(error_kind, detail) => {
                tracing::warn!("Task {} failed ({:?}): {}", task_id.0, error_kind, detail);
                if let Err(e) = self
                    .client
                    .report(
                        &self.cfg.worker_id,
                        &task_id,
                        TaskOutcome::Failure { error_kind, detail },
                    )
                    .await
                {
                    tracing::warn!("Failed to report task {}: {:#}", task_id.0, e);
                }
            }
            TaskEnd::Abandoned(reason) => {
                tracing::info!("Abandoned task {}: {}", task_id.0, reason);
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove scratch dir {:?}: {}", scratch, e);
            }
        }
    }

    /// One task attempt: stage inputs, run the container under heartbeats,
    /// collect and upload outputs. Every error path maps to a `TaskEnd`.
    async fn execute(&self, assignment: &TaskAssignment, scratch: &PathBuf) -> TaskEnd {
        let Some(descriptor) = self.plugins.get(&assignment.plugin_kind) else {
            return TaskEnd::Failed(
                ErrorKind::PluginUnknown,
                format!("no descriptor for plugin kind {:?}", assignment.plugin_kind),
            );
        };

        // Fresh scratch directory per attempt.
        let _ = tokio::fs::remove_dir_all(scratch).await;
        if let Err(e) = tokio::fs::create_dir_all(scratch).await {
            return TaskEnd::Failed(
                ErrorKind::InputUnavailable,
                format!("cannot create scratch dir: {}", e),
            );
        }

        let local_names = match descriptor.local_input_names(assignment.inputs.len()) {
            Ok(names) => names,
            Err(e) => return TaskEnd::Failed(ErrorKind::PluginUnknown, format!("{:#}", e)),
        };

        for (artifact, local) in assignment.inputs.iter().zip(&local_names) {
            let bytes = match self
                .client
                .download_artifact(&assignment.job_id, artifact)
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    return TaskEnd::Failed(
                        ErrorKind::InputUnavailable,
                        format!("download of {} failed: {:#}", artifact, e),
                    )
                }
            };
            if let Err(e) = tokio::fs::write(scratch.join(local), &bytes).await {
                return TaskEnd::Failed(
                    ErrorKind::InputUnavailable,
                    format!("staging {} failed: {}", local, e),
                );
            }
        }

        let argv = match descriptor.render_argv(&assignment.params, &local_names) {
            Ok(argv) => argv,
            Err(e) => return TaskEnd::Failed(ErrorKind::PluginUnknown, format!("{:#}", e)),
        };

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let spec = ContainerSpec {
            name: format!("crowd-{}-{}", &assignment.task_id.0[..8], &nonce[..8]),
            image: descriptor.image.clone(),
            argv,
            scratch_dir: scratch.clone(),
        };
        let container_name = spec.name.clone();

        let (reassigned_tx, mut reassigned_rx) = watch::channel(false);
        let heartbeats = tokio::spawn(heartbeat_loop(
            self.client.clone(),
            self.cfg.worker_id.clone(),
            assignment.task_id.clone(),
            self.cfg.heartbeat_period(),
            reassigned_tx,
        ));

        let end = tokio::select! {
            run = self.runtime.run(spec) => match run {
                Err(e) => TaskEnd::Failed(
                    ErrorKind::PluginExit,
                    format!("container runtime error: {:#}", e),
                ),
                Ok(exit) if !exit.success() => TaskEnd::Failed(
                    ErrorKind::PluginExit,
                    format!("exit code {}: {}", exit.code, exit.stderr_tail),
                ),
                Ok(_) => self.publish_outputs(assignment, &descriptor.expected_outputs, scratch).await,
            },
            _ = reassigned_rx.changed() => {
                let _ = self.runtime.kill(&container_name).await;
                TaskEnd::Abandoned("reassigned by coordinator".to_string())
            }
        };

        heartbeats.abort();
        end
    }

    /// Reads each declared output from the scratch directory and uploads it
    /// under the task's expected artifact name.
    async fn publish_outputs(
        &self,
        assignment: &TaskAssignment,
        declared_outputs: &[String],
        scratch: &PathBuf,
    ) -> TaskEnd {
        let mut uploaded = Vec::with_capacity(declared_outputs.len());

        for (declared, artifact) in declared_outputs.iter().zip(&assignment.expected_outputs) {
            let bytes = match tokio::fs::read(scratch.join(declared)).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return TaskEnd::Failed(
                        ErrorKind::OutputMissing,
                        format!("container exited 0 but {} is missing", declared),
                    )
                }
            };

            if let Err(e) = self
                .client
                .upload_artifact(&assignment.job_id, artifact, bytes)
                .await
            {
                // The lease sweeper will requeue this attempt.
                return TaskEnd::Abandoned(format!("upload of {} failed: {:#}", artifact, e));
            }
            uploaded.push(artifact.clone());
        }

        TaskEnd::Completed(uploaded)
    }
}

/// Keeps the lease alive until told otherwise. A `reassigned` response stops
/// the loop and signals the executor to kill the container.
async fn heartbeat_loop(
    client: CoordinatorClient,
    worker_id: String,
    task_id: TaskId,
    period: Duration,
    reassigned: watch::Sender<bool>,
) {
    let mut interval = tokio::time::interval(period);
    // The first tick fires immediately and doubles as the progress report
    // that moves the task to running.
    loop {
        interval.tick().await;
        match client.heartbeat(&worker_id, &task_id).await {
            Ok(HeartbeatStatus::Ok) => {}
            Ok(HeartbeatStatus::Reassigned) => {
                tracing::warn!("Task {} was reassigned, stopping work", task_id.0);
                let _ = reassigned.send(true);
                break;
            }
            Err(e) => {
                tracing::warn!("Heartbeat for task {} failed: {:#}", task_id.0, e);
            }
        }
    }
}

/// Sleeps for a random duration in `[base, 2 * base)`.
async fn sleep_with_jitter(base: Duration) {
    let base_ms = base.as_millis().max(1) as u64;
    let jitter = rand::random::<u64>() % base_ms;
    tokio::time::sleep(Duration::from_millis(base_ms + jitter)).await;
}
