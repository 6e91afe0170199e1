use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Chosen by the worker itself; the coordinator never mints these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkerId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobShape {
    Single,
    MapReduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether the job's tasks may still be dispatched or make progress.
    pub fn is_runnable(self) -> bool {
        matches!(self, JobState::Pending | JobState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Single,
    Map,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Assigned,
    Running,
    Succeeded,
    Failed,
}

/// The failure vocabulary shared by workers and the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PluginUnknown,
    InputUnavailable,
    PluginExit,
    OutputMissing,
    LeaseExpired,
    JobCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub detail: String,
}

/// A time-bounded claim one worker holds on one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub worker: WorkerId,
    pub issued_at: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone)]
pub struct JobEntry {
    pub id: JobId,
    pub shape: JobShape,
    pub map_plugin: String,
    pub reduce_plugin: Option<String>,
    /// Expected output artifact name of the reduce task, resolved at submit
    /// time so the registry can chain the reduce stage without consulting
    /// plugin descriptors.
    pub reduce_output: Option<String>,
    pub shards: u32,
    pub params: serde_json::Value,
    pub state: JobState,
    pub submitted_at: u64,
    pub task_ids: Vec<TaskId>,
    pub final_output: Option<String>,
    pub last_error: Option<TaskError>,
}

#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub id: TaskId,
    pub job_id: JobId,
    pub kind: TaskKind,
    pub shard_index: Option<u32>,
    pub plugin_kind: String,
    /// Artifact names (within the parent job) this task reads.
    pub inputs: Vec<String>,
    /// Artifact name its output is uploaded under.
    pub output: String,
    pub state: TaskState,
    pub lease: Option<Lease>,
    pub retry_count: u32,
    pub last_error: Option<TaskError>,
    pub pending_since: u64,
    /// Last worker that failed this task, for the dispatch cooldown.
    pub last_failed: Option<(WorkerId, u64)>,
}

/// Everything the worker needs to start executing a claimed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub kind: TaskKind,
    pub plugin_kind: String,
    pub inputs: Vec<String>,
    pub expected_outputs: Vec<String>,
    pub params: serde_json::Value,
    pub lease_expires: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub shard_index: Option<u32>,
    pub state: TaskState,
    pub retry_count: u32,
    pub last_error: Option<TaskError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub state: JobState,
    pub submitted_at: u64,
    pub tasks: Vec<TaskSummary>,
    pub final_output: Option<String>,
    pub last_error: Option<TaskError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Ok,
    Reassigned,
}

/// Registry counters for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub jobs: usize,
    pub workers: usize,
    pub tasks_pending: usize,
    pub tasks_assigned: usize,
    pub tasks_running: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
