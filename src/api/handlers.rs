//! HTTP Request Handlers
//!
//! Axum route handlers for the coordinator. Client-facing endpoints cover
//! job submission, status, cancellation, and artifact download; worker-facing
//! endpoints cover claim, heartbeat, report, and artifact upload.
//!
//! Handlers do the orchestration that touches both the store and the
//! registry (staging inputs, sharding, chaining side effects); neither of
//! those ever calls the other.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Extension, Path};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use sysinfo::System;

use super::protocol::*;
use crate::error::CoordinatorError;
use crate::registry::registry::{InstallJob, JobRegistry, SuccessOutcome, TaskBlueprint};
use crate::registry::shard::{map_output_name, shard_name, shard_ranges};
use crate::registry::types::{JobId, JobShape, TaskKind, WorkerId};
use crate::store::files::{content_hash, ArtifactRole, ArtifactStore};
use crate::worker::plugins::PluginRegistry;

/// Wrapper that turns a `CoordinatorError` into an HTTP response.
pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::NotFound(_) | CoordinatorError::JobUnknown(_) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::Conflict(_) => StatusCode::CONFLICT,
            CoordinatorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError(CoordinatorError::BadRequest(msg.into()))
}

pub fn build_router(
    registry: Arc<JobRegistry>,
    store: Arc<ArtifactStore>,
    plugins: Arc<PluginRegistry>,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health/stats", get(handle_stats))
        .route(ENDPOINT_SUBMIT_JOB, post(handle_submit_job))
        .route(
            &format!("{}/:job_id", ENDPOINT_JOB_STATUS),
            get(handle_get_job),
        )
        .route(
            &format!("{}/:job_id", ENDPOINT_JOB_CANCEL),
            post(handle_cancel_job),
        )
        .route(
            &format!("{}/:job_id/:name", ENDPOINT_ARTIFACT),
            get(handle_download_artifact).put(handle_upload_artifact),
        )
        .route(ENDPOINT_CLAIM_TASK, post(handle_claim_task))
        .route(ENDPOINT_HEARTBEAT, post(handle_heartbeat))
        .route(ENDPOINT_REPORT_TASK, post(handle_report_task))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(Extension(registry))
        .layer(Extension(store))
        .layer(Extension(plugins))
}

async fn handle_root() -> Json<BannerResponse> {
    Json(BannerResponse {
        service: "crowd-compute coordinator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_stats(Extension(registry): Extension<Arc<JobRegistry>>) -> Json<StatsResponse> {
    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();

    Json(StatsResponse {
        registry: registry.stats(),
        cpu_usage: sys.global_cpu_info().cpu_usage(),
        mem_used_mb: sys.used_memory() / (1024 * 1024),
        mem_total_mb: sys.total_memory() / (1024 * 1024),
    })
}

/// Accepts a job, stages its inputs, shards the `map_reduce` input, and
/// installs the job with its initial tasks.
pub async fn handle_submit_job(
    Extension(registry): Extension<Arc<JobRegistry>>,
    Extension(store): Extension<Arc<ArtifactStore>>,
    Extension(plugins): Extension<Arc<PluginRegistry>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let shards = req.shards.unwrap_or(1);
    if req.inputs.is_empty() {
        return Err(bad_request("at least one input artifact is required"));
    }
    let params = match &req.params {
        serde_json::Value::Null => serde_json::json!({}),
        serde_json::Value::Object(_) => req.params.clone(),
        _ => return Err(bad_request("params must be an object")),
    };
    if req.shape == JobShape::MapReduce {
        if req.reduce_plugin.is_none() {
            return Err(bad_request("map_reduce jobs require a reduce_plugin"));
        }
        if shards < 1 {
            return Err(bad_request("shards must be at least 1"));
        }
        if req.inputs.len() != 1 {
            return Err(bad_request(
                "map_reduce jobs take exactly one input artifact",
            ));
        }
    }

    let job_id = JobId::new();
    store.register_job(&job_id.0).await?;

    let blueprints = match stage_job_artifacts(&store, &plugins, &job_id, &req, shards).await {
        Ok(blueprints) => blueprints,
        Err(err) => {
            // A half-staged job is useless; throw the directory away.
            let _ = store.drop_job(&job_id.0).await;
            return Err(err.into());
        }
    };

    let tasks_created = blueprints.len();
    registry.install_job(InstallJob {
        job_id: job_id.clone(),
        shape: req.shape,
        map_plugin: req.map_plugin.clone(),
        reduce_plugin: req.reduce_plugin.clone(),
        reduce_output: req
            .reduce_plugin
            .as_deref()
            .map(|kind| plugins.declared_output(kind)),
        shards,
        params,
        tasks: blueprints,
    });

    Ok(Json(SubmitJobResponse {
        job_id,
        tasks_created,
    }))
}

/// Writes the uploaded inputs (and, for `map_reduce`, the shard chunks) and
/// returns the initial task blueprints.
async fn stage_job_artifacts(
    store: &ArtifactStore,
    plugins: &PluginRegistry,
    job_id: &JobId,
    req: &SubmitJobRequest,
    shards: u32,
) -> crate::error::Result<Vec<TaskBlueprint>> {
    for (name, bytes) in &req.inputs {
        store
            .put(&job_id.0, name, ArtifactRole::Input, bytes)
            .await?;
    }

    match req.shape {
        JobShape::Single => Ok(vec![TaskBlueprint {
            kind: TaskKind::Single,
            shard_index: None,
            plugin_kind: req.map_plugin.clone(),
            inputs: req.inputs.keys().cloned().collect(),
            output: plugins.declared_output(&req.map_plugin),
        }]),
        JobShape::MapReduce => {
            let (_, bytes) = req.inputs.iter().next().expect("validated non-empty");
            let declared = plugins.declared_output(&req.map_plugin);

            let mut blueprints = Vec::with_capacity(shards as usize);
            for (index, range) in shard_ranges(bytes, shards as usize).into_iter().enumerate() {
                let name = shard_name(index);
                store
                    .put(&job_id.0, &name, ArtifactRole::Shard, &bytes[range])
                    .await?;
                blueprints.push(TaskBlueprint {
                    kind: TaskKind::Map,
                    shard_index: Some(index as u32),
                    plugin_kind: req.map_plugin.clone(),
                    inputs: vec![name],
                    output: map_output_name(index, &declared),
                });
            }
            Ok(blueprints)
        }
    }
}

pub async fn handle_get_job(
    Extension(registry): Extension<Arc<JobRegistry>>,
    Path(job_id): Path<String>,
) -> Result<Json<crate::registry::types::JobView>, ApiError> {
    registry
        .job_view(&JobId(job_id.clone()))
        .map(Json)
        .ok_or_else(|| ApiError(CoordinatorError::NotFound(format!("job {}", job_id))))
}

pub async fn handle_cancel_job(
    Extension(registry): Extension<Arc<JobRegistry>>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let job_id = JobId(job_id);
    registry.cancel_job(&job_id)?;
    Ok(Json(CancelJobResponse {
        job_id,
        cancelled: true,
    }))
}

pub async fn handle_download_artifact(
    Extension(store): Extension<Arc<ArtifactStore>>,
    Path((job_id, name)): Path<(String, String)>,
) -> Result<([(HeaderName, String); 1], Vec<u8>), ApiError> {
    let (bytes, sha256) = store.get(&job_id, &name).await?;
    Ok((
        [(HeaderName::from_static(HEADER_ARTIFACT_SHA256), sha256)],
        bytes,
    ))
}

/// Stores a task output. Only names some task of the job declared as its
/// expected output are accepted; re-uploading identical bytes (a retried
/// attempt) is treated as already done.
pub async fn handle_upload_artifact(
    Extension(registry): Extension<Arc<JobRegistry>>,
    Extension(store): Extension<Arc<ArtifactStore>>,
    Path((job_id, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<UploadArtifactResponse>, ApiError> {
    if !registry.is_expected_output(&JobId(job_id.clone()), &name) {
        return Err(bad_request(format!(
            "{} is not a declared output of job {}",
            name, job_id
        )));
    }

    let meta = match store
        .put(&job_id, &name, ArtifactRole::TaskOutput, &body)
        .await
    {
        Ok(meta) => meta,
        Err(CoordinatorError::Conflict(_)) => {
            let existing = store
                .meta(&job_id, &name)
                .ok_or_else(|| CoordinatorError::Conflict(format!("artifact {} busy", name)))?;
            if existing.sha256 != content_hash(&body) {
                return Err(CoordinatorError::Conflict(format!(
                    "artifact {}/{} already finalized with different content",
                    job_id, name
                ))
                .into());
            }
            existing
        }
        Err(err) => return Err(err.into()),
    };

    Ok(Json(UploadArtifactResponse {
        name: meta.name,
        size: meta.size,
        sha256: meta.sha256,
    }))
}

pub async fn handle_claim_task(
    Extension(registry): Extension<Arc<JobRegistry>>,
    Json(req): Json<ClaimTaskRequest>,
) -> Json<ClaimTaskResponse> {
    let task = registry.claim(&WorkerId(req.worker_id));
    Json(ClaimTaskResponse { task })
}

pub async fn handle_heartbeat(
    Extension(registry): Extension<Arc<JobRegistry>>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    let status = registry.heartbeat(&WorkerId(req.worker_id), &req.task_id);
    Json(HeartbeatResponse { status })
}

/// Commits a task outcome. Success reports are validated against the task's
/// declared output and the store before the registry transition runs.
pub async fn handle_report_task(
    Extension(registry): Extension<Arc<JobRegistry>>,
    Extension(store): Extension<Arc<ArtifactStore>>,
    Json(req): Json<ReportTaskRequest>,
) -> Result<Json<ReportTaskResponse>, ApiError> {
    let worker = WorkerId(req.worker_id);

    let accepted = match req.outcome {
        TaskOutcome::Success { outputs } => {
            let (job_id, expected) = registry
                .task_output(&req.task_id)
                .ok_or_else(|| CoordinatorError::NotFound(format!("task {}", req.task_id.0)))?;

            if outputs.is_empty() {
                return Err(bad_request("success report without outputs"));
            }
            for name in &outputs {
                if *name != expected {
                    return Err(bad_request(format!(
                        "{} is not a declared output of task {}",
                        name, req.task_id.0
                    )));
                }
                if !store.is_finalized(&job_id.0, name) {
                    return Err(bad_request(format!(
                        "output {} was never uploaded",
                        name
                    )));
                }
            }

            match registry.report_success(&worker, &req.task_id) {
                SuccessOutcome::Stale => false,
                SuccessOutcome::JobSucceeded { final_output } => {
                    if let Err(err) = store.mark_final(&job_id.0, &final_output) {
                        tracing::error!(
                            "Failed to mark {}/{} final: {}",
                            job_id.0,
                            final_output,
                            err
                        );
                    }
                    true
                }
                _ => true,
            }
        }
        TaskOutcome::Failure { error_kind, detail } => {
            !matches!(
                registry.report_failure(&worker, &req.task_id, error_kind, detail),
                crate::registry::registry::FailureOutcome::Stale
            )
        }
    };

    Ok(Json(ReportTaskResponse { accepted }))
}
