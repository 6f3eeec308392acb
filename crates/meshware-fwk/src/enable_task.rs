//! Enable one remote capability on this device

use meshware_core::{anonymize, capability_key, device_id_from_uuid, TaskState};
use tracing::{error, info};

use crate::task::{Task, TaskEnv};

pub(crate) async fn run(task: &Task, env: &TaskEnv) {
    let _permit = env.executor.acquire_worker().await;
    task.set_state(TaskState::Running);

    let param = task.param();
    let result = env
        .components
        .enable(&param.network_id, &param.uuid, &param.dh_id, param.dh_type)
        .await;

    match result {
        Ok(()) => {
            let key = capability_key(&device_id_from_uuid(&param.uuid), &param.dh_id);
            env.board.save_enabled_device(&key, param.clone());
            info!("Enable task {} succeeded, dhId: {}", task.id(), anonymize(&param.dh_id));
            task.set_state(TaskState::Success);
        }
        Err(e) => {
            error!(
                "Enable task {} failed, dhId: {}: {}",
                task.id(),
                anonymize(&param.dh_id),
                e
            );
            task.set_state(TaskState::Fail);
        }
    }
}
