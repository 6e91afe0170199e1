use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::types::{
    ErrorKind, HeartbeatStatus, JobId, JobShape, RegistryStats, TaskAssignment, TaskId,
};

// Endpoints
pub const ENDPOINT_SUBMIT_JOB: &str = "/job/submit";
pub const ENDPOINT_JOB_STATUS: &str = "/job/status";
pub const ENDPOINT_JOB_CANCEL: &str = "/job/cancel";
pub const ENDPOINT_ARTIFACT: &str = "/artifact";
pub const ENDPOINT_CLAIM_TASK: &str = "/task/claim";
pub const ENDPOINT_HEARTBEAT: &str = "/task/heartbeat";
pub const ENDPOINT_REPORT_TASK: &str = "/task/report";

/// Response header carrying an artifact's content hash on download.
pub const HEADER_ARTIFACT_SHA256: &str = "x-artifact-sha256";

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub shape: JobShape,
    pub map_plugin: String,
    #[serde(default)]
    pub reduce_plugin: Option<String>,
    #[serde(default)]
    pub shards: Option<u32>,
    /// Plugin parameter bag; an object of string/number values.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Input artifacts by name. A `map_reduce` job takes exactly one, the
    /// file to shard.
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub tasks_created: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: JobId,
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimTaskRequest {
    pub worker_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimTaskResponse {
    pub task: Option<TaskAssignment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub task_id: TaskId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: HeartbeatStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success {
        outputs: Vec<String>,
    },
    Failure {
        error_kind: ErrorKind,
        detail: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportTaskRequest {
    pub worker_id: String,
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportTaskResponse {
    pub accepted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadArtifactResponse {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BannerResponse {
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub registry: RegistryStats,
    pub cpu_usage: f32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
