//! Control-plane HTTP handlers (spec §6 "HTTP/devlxd surface"). Grounded on
//! the teacher's `materialized::http` handler shape (one function per
//! route, returning a type that implements `IntoResponse`), generalized
//! from materialized's single-process status page to the `{type, status,
//! status_code, metadata}` envelope this surface uses everywhere.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleet_api_types::envelope::{AsyncEnvelope, Envelope};
use fleet_api_types::error::SmartError;
use fleet_api_types::instance::Instance;
use fleet_operations::hooks::Hooks;
use fleet_recovery::{
    resolve_pool_handle, run_recovery, scan_unknown_volumes, DependencyChecker, DirDriver,
    RecoveryMode, RecoveryRequest, UnknownVolumeRegistry,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::instance_store::InstanceStore;
use crate::state::Daemon;

/// `GET /1.0`.
pub async fn root_info(State(daemon): State<Daemon>) -> impl IntoResponse {
    Envelope::sync(json!({
        "api_extensions": [],
        "api_status": "stable",
        "api_version": "1.0",
        "auth": "trusted",
        "environment": {
            "server_name": daemon.config.member_id,
            "server_version": daemon.build_info.version,
        },
    }))
}

/// `GET /metrics`, served on the separate metrics listener (spec §6
/// "Persisted state"/"environment var": metrics bind separately from the
/// control plane so it can be exposed with weaker network restrictions).
pub async fn metrics() -> Response {
    match crate::metrics::render() {
        Ok(body) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => SmartError::Internal(err).into_response(),
    }
}

// ---- Operations ----

pub async fn list_operations(State(daemon): State<Daemon>) -> impl IntoResponse {
    Envelope::sync(daemon.operations.render_all(None))
}

pub async fn get_operation(
    State(daemon): State<Daemon>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, SmartError> {
    let op = daemon
        .operations
        .get(id)
        .ok_or_else(|| SmartError::NotFound(format!("operation {id} not found")))?;
    Ok(Envelope::sync(op.render()))
}

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    timeout: Option<u64>,
}

pub async fn wait_operation(
    State(daemon): State<Daemon>,
    Path(id): Path<Uuid>,
    Query(query): Query<WaitQuery>,
) -> Result<impl IntoResponse, SmartError> {
    let op = daemon
        .operations
        .get(id)
        .ok_or_else(|| SmartError::NotFound(format!("operation {id} not found")))?;
    let deadline = query.timeout.map(Duration::from_secs);
    op.wait(deadline).await;
    Ok(Envelope::sync(op.render()))
}

pub async fn cancel_operation(
    State(daemon): State<Daemon>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, SmartError> {
    let op = daemon
        .operations
        .get(id)
        .ok_or_else(|| SmartError::NotFound(format!("operation {id} not found")))?;
    op.cancel()
        .await
        .map_err(|err| SmartError::BadRequest(err.to_string()))?;
    Ok(Envelope::sync(op.render()))
}

// ---- Instances ----

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    #[allow(dead_code)]
    target: Option<String>,
}

pub async fn get_instance(
    State(daemon): State<Daemon>,
    Path((project, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, SmartError> {
    let store = InstanceStore::new(daemon.stash.clone());
    let instance = store
        .load_instance(&project, &name)
        .await?
        .ok_or_else(|| SmartError::NotFound(format!("instance {project}/{name} not found")))?;
    let etag = store.etag(&instance, &project).await?;
    let mut response = Envelope::sync(instance).into_response();
    response.headers_mut().insert(
        axum::http::header::ETAG,
        etag.parse().expect("etag hex renders to a valid header value"),
    );
    Ok(response)
}

/// `PUT /1.0/instances/{project}/{name}`: creates the instance as an async
/// operation (spec §6: instance creation is the canonical long-running
/// task-class operation).
pub async fn create_instance(
    State(daemon): State<Daemon>,
    Path((project, name)): Path<(String, String)>,
    Json(mut instance): Json<Instance>,
) -> Result<impl IntoResponse, SmartError> {
    instance.project = project.clone();
    instance.name = name.clone();
    let stash = daemon.stash.clone();
    let resources = BTreeMap::from([("instances".to_string(), vec![format!("/1.0/instances/{name}")])]);
    let op = daemon
        .operations
        .create(
            fleet_api_types::operation::OperationClass::Task,
            Some(project),
            resources,
            serde_json::Value::Null,
            Hooks::task(Box::new(move |_cancel| {
                let stash = stash.clone();
                let instance = instance.clone();
                Box::pin(async move {
                    let store = InstanceStore::new(stash);
                    store.put_instance(instance).await?;
                    Ok(serde_json::Value::Null)
                })
            })),
        )
        .map_err(|err| SmartError::BadRequest(err.to_string()))?;
    op.start().map_err(|err| SmartError::BadRequest(err.to_string()))?;
    Ok(AsyncEnvelope { operation_id: op.id() })
}

/// `PATCH /1.0/instances/{project}/{name}`: merges the posted fragment into
/// local config/devices, enforcing `If-Match` against the current ETag
/// (spec §3 "ETag").
pub async fn patch_instance(
    State(daemon): State<Daemon>,
    Path((project, name)): Path<(String, String)>,
    headers: axum::http::HeaderMap,
    Json(patch): Json<InstancePatch>,
) -> Result<impl IntoResponse, SmartError> {
    let store = InstanceStore::new(daemon.stash.clone());
    let mut instance = store
        .load_instance(&project, &name)
        .await?
        .ok_or_else(|| SmartError::NotFound(format!("instance {project}/{name} not found")))?;

    if let Some(if_match) = headers.get(axum::http::header::IF_MATCH) {
        let if_match = if_match.to_str().unwrap_or_default();
        if if_match != store.etag(&instance, &project).await? {
            return Err(SmartError::PreconditionFailed);
        }
    }

    if let Some(config) = patch.config {
        instance.local_config.extend(config);
    }
    if let Some(devices) = patch.devices {
        instance.local_devices.extend(devices);
    }
    store.put_instance(instance.clone()).await?;
    let etag = store.etag(&instance, &project).await?;
    let mut response = Envelope::sync(instance).into_response();
    response.headers_mut().insert(
        axum::http::header::ETAG,
        etag.parse().expect("etag hex renders to a valid header value"),
    );
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct InstancePatch {
    config: Option<BTreeMap<String, String>>,
    devices: Option<BTreeMap<String, fleet_api_types::instance::DeviceConfig>>,
}

// ---- Storage recovery (spec §4.4) ----

#[derive(Debug, Deserialize)]
pub struct RecoverRequestBody {
    pub pool_name: String,
    pub pool_root: std::path::PathBuf,
    pub validate_only: bool,
}

/// A permissive checker used until the daemon grows project/profile/network
/// stores of its own for recovery to validate against; recovery is a
/// single-member admin operation performed against a freshly recreated
/// cluster, where referenced projects/profiles/networks are not yet known.
struct AllowAllDependencyChecker;

impl DependencyChecker for AllowAllDependencyChecker {
    fn project_exists(&self, _project: &str) -> bool {
        true
    }
    fn profile_exists(&self, _project: &str, _profile: &str) -> bool {
        true
    }
    fn network_exists(&self, _project: &str, _network: &str) -> bool {
        true
    }
}

/// `POST /1.0/storage-pools/recover` (spec §4.4 "Consistency rules": "Pool
/// recovery writes are rejected when clustered").
pub async fn recover_storage_pool(
    State(daemon): State<Daemon>,
    Json(body): Json<RecoverRequestBody>,
) -> Result<impl IntoResponse, SmartError> {
    if !daemon.member_table.is_empty() {
        return Err(SmartError::BadRequest(
            "storage-pool recovery is a single-member admin operation".into(),
        ));
    }
    let driver: std::sync::Arc<dyn fleet_recovery::StorageDriver> =
        std::sync::Arc::new(DirDriver { root: body.pool_root.clone() });
    let handle = resolve_pool_handle(
        None,
        Some((body.pool_name.clone(), BTreeMap::new(), driver)),
        false,
    )
    .map_err(|err| SmartError::BadRequest(err.to_string()))?;
    let pools = vec![handle];

    let mut reverter = fleet_recovery::Reverter::new();
    fleet_recovery::mount_all(&pools, &mut reverter)
        .await
        .map_err(SmartError::Internal)?;
    let mut registry = UnknownVolumeRegistry::new();
    scan_unknown_volumes(&pools, &mut registry).await;
    let volumes = registry.into_volumes();

    let mode = if body.validate_only { RecoveryMode::ValidateOnly } else { RecoveryMode::Import };
    let request = RecoveryRequest {
        pools: &pools,
        volumes,
        checker: &AllowAllDependencyChecker,
        stash: daemon.stash.clone(),
    };
    let report = run_recovery(request, mode).await.map_err(SmartError::Internal)?;
    reverter.commit();
    Ok(Envelope::sync(report))
}
