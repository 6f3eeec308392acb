//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use meshware_core::{anonymize, DH_LOCAL_VERSION};
use meshware_fwk::{FwkError, CAPABILITY_STORE_ID, VERSION_STORE_ID};
use meshware_store::ChangeNotification;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn error_response(e: FwkError) -> Response {
    let status = match e {
        FwkError::ParamInvalid(_) | FwkError::InvalidDumpArgs => StatusCode::BAD_REQUEST,
        FwkError::RepeatOnline | FwkError::NotOnline => StatusCode::CONFLICT,
        FwkError::NotFound(_) | FwkError::TypeNotExist(_) => StatusCode::NOT_FOUND,
        FwkError::NotInitialized | FwkError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiError::new(e.to_string()))).into_response()
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub dh_version: String,
    pub components: BTreeMap<String, String>,
}

/// Framework version and the local sink version of each component type
pub async fn get_version(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let components = match state.factory.get_component_version().await {
        Ok(versions) => versions
            .into_iter()
            .map(|(dh_type, version)| (dh_type.to_string(), version))
            .collect(),
        Err(FwkError::NotInitialized) => BTreeMap::new(),
        Err(e) => return error_response(e),
    };
    Json(VersionResponse {
        dh_version: DH_LOCAL_VERSION.to_string(),
        components,
    })
    .into_response()
}

/// Dump request body
#[derive(Deserialize)]
pub struct DumpRequest {
    #[serde(default)]
    pub args: Vec<String>,
}

/// Run a dump command and return its text
pub async fn dump(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DumpRequest>,
) -> impl IntoResponse {
    debug!(args = ?req.args, "Dump requested");
    match state.factory.dump(&req.args).await {
        Ok(text) => (StatusCode::OK, [("content-type", "text/plain")], text).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// Capability records currently cached
pub async fn list_capabilities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let caps = match state.factory.manager().await {
        Some(manager) => manager.capabilities().dump_capability_infos(),
        None => Vec::new(),
    };
    Json(caps)
}

/// Tasks currently on the board
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tasks = match state.factory.manager().await {
        Some(manager) => manager.board().dump_all_tasks(),
        None => Vec::new(),
    };
    Json(tasks)
}

/// Device membership change from the mesh
#[derive(Deserialize)]
pub struct DeviceEvent {
    pub network_id: String,
    pub uuid: String,
    #[serde(default)]
    pub device_type: u16,
}

pub async fn device_online(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceEvent>,
) -> impl IntoResponse {
    info!(network_id = %anonymize(&req.network_id), "Device online notification");
    match state
        .factory
        .send_online_event(&req.network_id, &req.uuid, req.device_type)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn device_offline(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceEvent>,
) -> impl IntoResponse {
    info!(network_id = %anonymize(&req.network_id), "Device offline notification");
    match state
        .factory
        .send_offline_event(&req.network_id, &req.uuid, req.device_type)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

/// Deliver records replicated from a peer into a store partition
pub async fn store_changes(
    State(state): State<Arc<AppState>>,
    Path(partition): Path<String>,
    Json(change): Json<ChangeNotification>,
) -> impl IntoResponse {
    if partition != CAPABILITY_STORE_ID && partition != VERSION_STORE_ID {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(format!("Unknown partition {}", partition))),
        )
            .into_response();
    }
    debug!(
        partition = %partition,
        insert = change.insert.len(),
        update = change.update.len(),
        delete = change.delete.len(),
        "Remote store change"
    );
    let store = state.store.store(&partition);
    tokio::task::spawn_blocking(move || store.apply_remote(&change));
    StatusCode::ACCEPTED.into_response()
}

/// System ability death notification
pub async fn system_ability_died(
    State(state): State<Arc<AppState>>,
    Path(sa_id): Path<i32>,
) -> impl IntoResponse {
    info!(sa_id, "System ability died");
    let recovering = state.factory.on_system_ability_died(sa_id).await;
    Json(serde_json::json!({ "sa_id": sa_id, "recovering": recovering }))
}
