//! Take a peer's capabilities offline and wait for every disable to report

use meshware_core::{anonymize, device_id_from_uuid, TaskParam, TaskState, TaskStep, TaskType};
use std::sync::Arc;
use tracing::{info, warn};

use crate::task::{Task, TaskEnv};

pub(crate) async fn run(task: &Arc<Task>, env: &TaskEnv) {
    task.set_state(TaskState::Running);
    for step in task.steps() {
        match step {
            TaskStep::UnregisterOfflineDistributedHardware => unregister_offline_hardware(task, env),
            TaskStep::WaitUnregistgerComplete => {
                info!(
                    "OffLine task {} waiting for {} disable tasks",
                    task.id(),
                    task.unfinished_children()
                );
                task.wait_children_finished().await;
            }
            TaskStep::ClearOfflineInfo => {
                let device_id = device_id_from_uuid(&task.param().uuid);
                env.capabilities.remove_capability_info_in_mem(&device_id);
            }
            other => warn!("OffLine task {} skips unexpected step {}", task.id(), other.label()),
        }
    }
    task.set_state(TaskState::Success);
}

fn unregister_offline_hardware(task: &Arc<Task>, env: &TaskEnv) {
    let param = task.param();
    let device_id = device_id_from_uuid(&param.uuid);
    let capabilities = env.capabilities.get_capabilities_by_device_id(&device_id);
    info!(
        "Unregister {} capabilities of networkId {}",
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
        if let Err(e) = env.dispatcher.dispatch(TaskType::Disable, child, Some(task)) {
            warn!("Dispatch disable of {} failed: {}", cap.anonymous_key(), e);
        }
    }
}
