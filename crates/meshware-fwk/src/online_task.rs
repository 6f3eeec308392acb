//! Bring a peer's capabilities online: sync its records, then enable each

use meshware_core::{anonymize, device_id_from_uuid, TaskParam, TaskState, TaskStep, TaskType};
use std::sync::Arc;
use tracing::{info, warn};

use crate::task::{Task, TaskEnv};

pub(crate) async fn run(task: &Arc<Task>, env: &TaskEnv) {
    task.set_state(TaskState::Running);
    for step in task.steps() {
        match step {
            TaskStep::SyncOnlineInfo => sync_online_info(task, env),
            TaskStep::RegisterOnlineDistributedHardware => register_online_hardware(task, env),
            other => warn!("OnLine task {} skips unexpected step {}", task.id(), other.label()),
        }
    }
    task.set_state(TaskState::Success);
}

fn sync_online_info(task: &Task, env: &TaskEnv) {
    let param = task.param();
    let device_id = device_id_from_uuid(&param.uuid);

    if let Err(e) = env.capabilities.manual_sync(&param.network_id) {
        warn!("Capability sync with {} failed: {}", anonymize(&param.network_id), e);
    }
    if let Err(e) = env.versions.manual_sync(&param.network_id) {
        warn!("Version sync with {} failed: {}", anonymize(&param.network_id), e);
    }
    if let Err(e) = env.capabilities.sync_device_info_from_db(&device_id) {
        warn!("Load capabilities of {} failed: {}", anonymize(&device_id), e);
    }
    if let Err(e) = env.versions.sync_version_info_from_db(&device_id) {
        warn!("Load version of {} failed: {}", anonymize(&device_id), e);
    }
}

fn register_online_hardware(task: &Arc<Task>, env: &TaskEnv) {
    let param = task.param();
    let device_id = device_id_from_uuid(&param.uuid);
    let capabilities = env.capabilities.get_capabilities_by_device_id(&device_id);
    info!(
        "Register {} capabilities of networkId {}",
        capabilities.len(),
        anonymize(&param.network_id)
    );

    for cap in capabilities {
        let child = TaskParam {
            network_id: param.network_id.clone(),
            uuid: param.uuid.clone(),
            dh_id: cap.dh_id.clone(),
            dh_type: cap.dh_type,
        };
        if let Err(e) = env.dispatcher.dispatch(TaskType::Enable, child, Some(task)) {
            warn!("Dispatch enable of {} failed: {}", cap.anonymous_key(), e);
        }
    }
}
