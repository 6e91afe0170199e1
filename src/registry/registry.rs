use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::*;
use crate::error::{CoordinatorError, Result};

/// Tunables of the task lifecycle. Every duration is in milliseconds.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub lease_ttl_ms: u64,
    pub worker_ttl_ms: u64,
    pub max_retries: u32,
    pub retry_cooldown_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: 30_000,
            worker_ttl_ms: 60_000,
            max_retries: 3,
            retry_cooldown_ms: 5_000,
        }
    }
}

/// A task to be created together with its job.
#[derive(Debug, Clone)]
pub struct TaskBlueprint {
    pub kind: TaskKind,
    pub shard_index: Option<u32>,
    pub plugin_kind: String,
    pub inputs: Vec<String>,
    pub output: String,
}

/// A fully prepared job submission: artifacts are already in the store, so
/// the registry can expose the whole job atomically.
#[derive(Debug, Clone)]
pub struct InstallJob {
    pub job_id: JobId,
    pub shape: JobShape,
    pub map_plugin: String,
    pub reduce_plugin: Option<String>,
    pub reduce_output: Option<String>,
    pub shards: u32,
    pub params: serde_json::Value,
    pub tasks: Vec<TaskBlueprint>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SuccessOutcome {
    /// Other tasks of the job are still outstanding.
    Progress,
    /// This was the last map task; the reduce task has been queued.
    ReduceSpawned(TaskId),
    /// The terminal task succeeded and the job with it.
    JobSucceeded { final_output: String },
    /// The reporter no longer holds the task; nothing was changed.
    Stale,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    Requeued { retry_count: u32 },
    JobFailed,
    Stale,
}

#[derive(Debug, Default)]
pub struct SweepStats {
    pub expired_tasks: usize,
    pub forgotten_workers: usize,
}

struct WorkerEntry {
    last_seen: u64,
    current_task: Option<TaskId>,
}

struct Inner {
    jobs: HashMap<String, JobEntry>,
    tasks: HashMap<String, TaskEntry>,
    workers: HashMap<String, WorkerEntry>,
}

/// The authoritative job/task state machine.
///
/// All mutation goes through the single inner lock; nothing async happens
/// while it is held, so the critical section stays short. Jobs and tasks
/// live in flat tables and reference each other by id.
pub struct JobRegistry {
    cfg: RegistryConfig,
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new(cfg: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                tasks: HashMap::new(),
                workers: HashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.cfg
    }

    /// Installs a job and its initial tasks in one step.
    pub fn install_job(&self, install: InstallJob) -> Vec<TaskId> {
        let now = now_ms();
        let mut inner = self.inner.lock().unwrap();

        let mut task_ids = Vec::with_capacity(install.tasks.len());
        for blueprint in install.tasks {
            let task_id = TaskId::new();
            inner.tasks.insert(
                task_id.0.clone(),
                TaskEntry {
                    id: task_id.clone(),
                    job_id: install.job_id.clone(),
                    kind: blueprint.kind,
                    shard_index: blueprint.shard_index,
                    plugin_kind: blueprint.plugin_kind,
                    inputs: blueprint.inputs,
                    output: blueprint.output,
                    state: TaskState::Pending,
                    lease: None,
                    retry_count: 0,
                    last_error: None,
                    pending_since: now,
                    last_failed: None,
                },
            );
            task_ids.push(task_id);
        }

        inner.jobs.insert(
            install.job_id.0.clone(),
            JobEntry {
                id: install.job_id.clone(),
                shape: install.shape,
                map_plugin: install.map_plugin,
                reduce_plugin: install.reduce_plugin,
                reduce_output: install.reduce_output,
                shards: install.shards,
                params: install.params,
                state: JobState::Pending,
                submitted_at: now,
                task_ids: task_ids.clone(),
                final_output: None,
                last_error: None,
            },
        );

        tracing::info!(
            "Installed job {} with {} initial task(s)",
            install.job_id.0,
            task_ids.len()
        );

        task_ids
    }

    /// Removes a job and all its tasks, e.g. when a submission fails halfway.
    pub fn remove_job(&self, job_id: &JobId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.remove(&job_id.0) {
            for task_id in &job.task_ids {
                inner.tasks.remove(&task_id.0);
            }
        }
    }

    /// Hands the oldest dispatchable `Pending` task to the polling worker.
    ///
    /// FIFO over `pending_since`, ties broken by task id. A task recently
    /// failed by this same worker is skipped for the cooldown window.
    pub fn claim(&self, worker: &WorkerId) -> Option<TaskAssignment> {
        let now = now_ms();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        inner
            .workers
            .entry(worker.0.clone())
            .or_insert(WorkerEntry {
                last_seen: now,
                current_task: None,
            })
            .last_seen = now;

        let candidate = inner
            .tasks
            .values()
            .filter(|task| task.state == TaskState::Pending)
            .filter(|task| {
                inner
                    .jobs
                    .get(&task.job_id.0)
                    .map(|job| job.state.is_runnable())
                    .unwrap_or(false)
            })
            .filter(|task| match &task.last_failed {
                Some((failed_by, at)) => {
                    failed_by != worker || now >= at + self.cfg.retry_cooldown_ms
                }
                None => true,
            })
            .min_by(|a, b| {
                (a.pending_since, &a.id)
                    .cmp(&(b.pending_since, &b.id))
            })?
            .id
            .clone();

        let task = inner.tasks.get_mut(&candidate.0)?;
        let lease = Lease {
            worker: worker.clone(),
            issued_at: now,
            expires_at: now + self.cfg.lease_ttl_ms,
        };
        task.state = TaskState::Assigned;
        task.lease = Some(lease.clone());

        let job = inner.jobs.get_mut(&task.job_id.0)?;
        if job.state == JobState::Pending {
            job.state = JobState::Running;
        }

        if let Some(entry) = inner.workers.get_mut(&worker.0) {
            entry.current_task = Some(task.id.clone());
        }

        tracing::info!(
            "Assigned task {} (job {}, plugin {}) to worker {}",
            task.id.0,
            task.job_id.0,
            task.plugin_kind,
            worker.0
        );

        Some(TaskAssignment {
            task_id: task.id.clone(),
            job_id: task.job_id.clone(),
            kind: task.kind,
            plugin_kind: task.plugin_kind.clone(),
            inputs: task.inputs.clone(),
            expected_outputs: vec![task.output.clone()],
            params: job.params.clone(),
            lease_expires: lease.expires_at,
        })
    }

    /// Extends the lease of a held task. The first heartbeat moves the task
    /// from `Assigned` to `Running`. Anything else means the worker lost the
    /// task and must abandon it.
    pub fn heartbeat(&self, worker: &WorkerId, task_id: &TaskId) -> HeartbeatStatus {
        let now = now_ms();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if let Some(entry) = inner.workers.get_mut(&worker.0) {
            entry.last_seen = now;
        }

        let Some(task) = inner.tasks.get_mut(&task_id.0) else {
            return HeartbeatStatus::Reassigned;
        };

        let job_runnable = inner
            .jobs
            .get(&task.job_id.0)
            .map(|job| job.state.is_runnable())
            .unwrap_or(false);

        let held_by_us = matches!(task.state, TaskState::Assigned | TaskState::Running)
            && task
                .lease
                .as_ref()
                .map(|lease| &lease.worker == worker)
                .unwrap_or(false);

        if !job_runnable || !held_by_us {
            return HeartbeatStatus::Reassigned;
        }

        if task.state == TaskState::Assigned {
            task.state = TaskState::Running;
        }
        if let Some(lease) = task.lease.as_mut() {
            lease.expires_at = now + self.cfg.lease_ttl_ms;
        }

        HeartbeatStatus::Ok
    }

    /// Commits a successful outcome and runs the chaining logic: the last map
    /// task of a `map_reduce` job queues the reduce task, and the terminal
    /// task completes the job.
    pub fn report_success(&self, worker: &WorkerId, task_id: &TaskId) -> SuccessOutcome {
        let now = now_ms();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if let Some(entry) = inner.workers.get_mut(&worker.0) {
            entry.last_seen = now;
            entry.current_task = None;
        }

        let Some(task) = inner.tasks.get_mut(&task_id.0) else {
            return SuccessOutcome::Stale;
        };
        if !holds(task, worker) {
            return SuccessOutcome::Stale;
        }
        let Some(job) = inner.jobs.get_mut(&task.job_id.0) else {
            return SuccessOutcome::Stale;
        };
        if !job.state.is_runnable() {
            return SuccessOutcome::Stale;
        }

        task.state = TaskState::Succeeded;
        task.lease = None;
        let kind = task.kind;
        let output = task.output.clone();

        match kind {
            TaskKind::Single | TaskKind::Reduce => {
                job.state = JobState::Succeeded;
                job.final_output = Some(output.clone());
                tracing::info!("Job {} succeeded (final output {})", job.id.0, output);
                SuccessOutcome::JobSucceeded {
                    final_output: output,
                }
            }
            TaskKind::Map => {
                let mut map_tasks: Vec<(u32, String)> = Vec::new();
                let mut all_done = true;
                let mut reduce_exists = false;
                for id in &job.task_ids {
                    let Some(peer) = inner.tasks.get(&id.0) else {
                        continue;
                    };
                    match peer.kind {
                        TaskKind::Map => {
                            if peer.state != TaskState::Succeeded {
                                all_done = false;
                            }
                            map_tasks
                                .push((peer.shard_index.unwrap_or(0), peer.output.clone()));
                        }
                        TaskKind::Reduce => reduce_exists = true,
                        TaskKind::Single => {}
                    }
                }

                if !all_done || reduce_exists {
                    return SuccessOutcome::Progress;
                }

                map_tasks.sort();
                let reduce_id = TaskId::new();
                let reduce = TaskEntry {
                    id: reduce_id.clone(),
                    job_id: job.id.clone(),
                    kind: TaskKind::Reduce,
                    shard_index: None,
                    plugin_kind: job
                        .reduce_plugin
                        .clone()
                        .unwrap_or_else(|| job.map_plugin.clone()),
                    inputs: map_tasks.into_iter().map(|(_, name)| name).collect(),
                    output: job
                        .reduce_output
                        .clone()
                        .unwrap_or_else(|| "final.out".to_string()),
                    state: TaskState::Pending,
                    lease: None,
                    retry_count: 0,
                    last_error: None,
                    pending_since: now,
                    last_failed: None,
                };
                job.task_ids.push(reduce_id.clone());
                inner.tasks.insert(reduce_id.0.clone(), reduce);

                tracing::info!(
                    "All map tasks of job {} complete, queued reduce task {}",
                    job.id.0,
                    reduce_id.0
                );

                SuccessOutcome::ReduceSpawned(reduce_id)
            }
        }
    }

    /// Records a failure and decides retry versus terminal. `OutputMissing`
    /// gets a single retry; everything else gets `max_retries` attempts.
    pub fn report_failure(
        &self,
        worker: &WorkerId,
        task_id: &TaskId,
        kind: ErrorKind,
        detail: String,
    ) -> FailureOutcome {
        let now = now_ms();
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if let Some(entry) = inner.workers.get_mut(&worker.0) {
            entry.last_seen = now;
            entry.current_task = None;
        }

        let Some(task) = inner.tasks.get_mut(&task_id.0) else {
            return FailureOutcome::Stale;
        };
        if !holds(task, worker) {
            return FailureOutcome::Stale;
        }
        let Some(job) = inner.jobs.get_mut(&task.job_id.0) else {
            return FailureOutcome::Stale;
        };
        if !job.state.is_runnable() {
            return FailureOutcome::Stale;
        }

        task.retry_count += 1;
        task.lease = None;
        task.last_error = Some(TaskError {
            kind,
            detail: detail.clone(),
        });

        let limit = match kind {
            ErrorKind::OutputMissing => 2.min(self.cfg.max_retries.max(1)),
            _ => self.cfg.max_retries.max(1),
        };

        if task.retry_count >= limit {
            task.state = TaskState::Failed;
            job.state = JobState::Failed;
            job.last_error = task.last_error.clone();
            tracing::error!(
                "Task {} failed terminally after {} attempt(s) ({:?}: {}), job {} failed",
                task.id.0,
                task.retry_count,
                kind,
                detail,
                job.id.0
            );
            FailureOutcome::JobFailed
        } else {
            task.state = TaskState::Pending;
            task.pending_since = now;
            task.last_failed = Some((worker.clone(), now));
            tracing::warn!(
                "Task {} failed ({:?}: {}), requeued (attempt {} of {})",
                task.id.0,
                kind,
                detail,
                task.retry_count,
                limit
            );
            FailureOutcome::Requeued {
                retry_count: task.retry_count,
            }
        }
    }

    /// Marks a job cancelled. Its tasks stop being dispatched and any holder
    /// learns through its next heartbeat.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(&job_id.0)
            .ok_or_else(|| CoordinatorError::NotFound(format!("job {}", job_id.0)))?;

        match job.state {
            JobState::Pending | JobState::Running => {
                job.state = JobState::Cancelled;
                tracing::info!("Job {} cancelled", job_id.0);
                Ok(())
            }
            JobState::Cancelled => Ok(()),
            state => Err(CoordinatorError::Conflict(format!(
                "job {} is already {:?}",
                job_id.0, state
            ))),
        }
    }

    /// Re-queues tasks with expired leases and forgets silent workers.
    pub fn sweep(&self, now: u64) -> SweepStats {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let mut stats = SweepStats::default();

        for task in inner.tasks.values_mut() {
            if !matches!(task.state, TaskState::Assigned | TaskState::Running) {
                continue;
            }
            let Some(lease) = task.lease.clone() else {
                continue;
            };
            if lease.expires_at > now {
                continue;
            }

            task.state = TaskState::Pending;
            task.lease = None;
            task.retry_count += 1;
            task.pending_since = now;
            task.last_error = Some(TaskError {
                kind: ErrorKind::LeaseExpired,
                detail: format!("lease of worker {} expired", lease.worker.0),
            });
            task.last_failed = Some((lease.worker.clone(), now));

            if let Some(entry) = inner.workers.get_mut(&lease.worker.0) {
                if entry.current_task.as_ref() == Some(&task.id) {
                    entry.current_task = None;
                }
            }

            tracing::warn!(
                "Lease on task {} expired (worker {}), requeued with retry_count {}",
                task.id.0,
                lease.worker.0,
                task.retry_count
            );
            stats.expired_tasks += 1;
        }

        let ttl = self.cfg.worker_ttl_ms;
        let before = inner.workers.len();
        inner.workers.retain(|_, entry| entry.last_seen + ttl > now);
        stats.forgotten_workers = before - inner.workers.len();

        stats
    }

    pub fn job_view(&self, job_id: &JobId) -> Option<JobView> {
        let inner = self.inner.lock().unwrap();
        let job = inner.jobs.get(&job_id.0)?;

        let tasks = job
            .task_ids
            .iter()
            .filter_map(|id| inner.tasks.get(&id.0))
            .map(|task| TaskSummary {
                task_id: task.id.clone(),
                kind: task.kind,
                shard_index: task.shard_index,
                state: task.state,
                retry_count: task.retry_count,
                last_error: task.last_error.clone(),
            })
            .collect();

        Some(JobView {
            job_id: job.id.clone(),
            state: job.state,
            submitted_at: job.submitted_at,
            tasks,
            final_output: job.final_output.clone(),
            last_error: job.last_error.clone(),
        })
    }

    pub fn job_state(&self, job_id: &JobId) -> Option<JobState> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.get(&job_id.0).map(|job| job.state)
    }

    /// Whether `name` is a declared output of some task of a still-runnable
    /// job, i.e. an upload target the coordinator should accept.
    pub fn is_expected_output(&self, job_id: &JobId, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(job) = inner.jobs.get(&job_id.0) else {
            return false;
        };
        if !job.state.is_runnable() {
            return false;
        }
        job.task_ids
            .iter()
            .filter_map(|id| inner.tasks.get(&id.0))
            .any(|task| task.output == name)
    }

    /// The `(job, expected output)` pair of a task, for report validation.
    pub fn task_output(&self, task_id: &TaskId) -> Option<(JobId, String)> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .get(&task_id.0)
            .map(|task| (task.job_id.clone(), task.output.clone()))
    }

    pub fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        let inner = self.inner.lock().unwrap();
        inner.tasks.get(&task_id.0).map(|task| task.state)
    }

    pub fn task_retry_count(&self, task_id: &TaskId) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        inner.tasks.get(&task_id.0).map(|task| task.retry_count)
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().unwrap();
        let mut stats = RegistryStats {
            jobs: inner.jobs.len(),
            workers: inner.workers.len(),
            ..Default::default()
        };
        for task in inner.tasks.values() {
            match task.state {
                TaskState::Pending => stats.tasks_pending += 1,
                TaskState::Assigned => stats.tasks_assigned += 1,
                TaskState::Running => stats.tasks_running += 1,
                TaskState::Succeeded => stats.tasks_succeeded += 1,
                TaskState::Failed => stats.tasks_failed += 1,
            }
        }
        stats
    }
}

fn holds(task: &TaskEntry, worker: &WorkerId) -> bool {
    matches!(task.state, TaskState::Assigned | TaskState::Running)
        && task
            .lease
            .as_ref()
            .map(|lease| &lease.worker == worker)
            .unwrap_or(false)
}
