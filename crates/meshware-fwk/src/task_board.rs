//! Board of in-flight tasks and of successfully enabled components

use meshware_core::{BusEvent, DhType, EventBus, TaskParam, TaskState, TaskStep, TaskType};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::error::{FwkError, Result};
use crate::task::Task;

/// Snapshot of one task for the dump surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDump {
    pub id: String,
    pub task_type: TaskType,
    pub dh_type: DhType,
    pub dh_id: String,
    pub state: TaskState,
    pub steps: Vec<TaskStep>,
}

pub struct TaskBoard {
    tasks: Mutex<HashMap<String, Arc<Task>>>,
    enabled: Mutex<HashMap<String, TaskParam>>,
    all_finished: Notify,
    bus: Arc<EventBus>,
}

impl TaskBoard {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            enabled: Mutex::new(HashMap::new()),
            all_finished: Notify::new(),
            bus,
        }
    }

    pub fn add_task(&self, task: Arc<Task>) -> Result<()> {
        {
            let mut tasks = self.tasks.lock();
            if tasks.contains_key(task.id()) {
                error!("Task id {} already on board", task.id());
                return Err(FwkError::RepeatTaskId(task.id().to_string()));
            }
            tasks.insert(task.id().to_string(), task.clone());
        }
        debug!("Add task {} ({})", task.id(), task.task_type().label());
        self.bus.publish(BusEvent::TaskCreated {
            id: task.id().to_string(),
            task_type: task.task_type(),
        });
        Ok(())
    }

    /// The only removal path; wakes waiters once the board is empty
    pub fn remove_task(&self, id: &str) {
        let (removed, now_empty) = {
            let mut tasks = self.tasks.lock();
            let removed = tasks.remove(id);
            (removed, tasks.is_empty())
        };
        let Some(task) = removed else {
            return;
        };
        debug!("Remove task {} ({})", id, task.state().label());
        self.bus.publish(BusEvent::TaskFinished {
            id: id.to_string(),
            task_type: task.task_type(),
            state: task.state(),
        });
        if now_empty {
            self.all_finished.notify_waiters();
        }
    }

    pub fn get_task(&self, id: &str) -> Option<Arc<Task>> {
        self.tasks.lock().get(id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_all_task_finish(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Wait until the board is empty or `timeout` elapses
    pub async fn wait_for_all_tasks_finish(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.all_finished.notified();
            let remaining = self.task_count();
            if remaining == 0 {
                info!("All tasks finished");
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.task_count();
                if remaining == 0 {
                    return Ok(());
                }
                error!("Timed out waiting for {} tasks", remaining);
                return Err(FwkError::TaskTimeout(remaining));
            }
        }
    }

    pub fn dump_all_tasks(&self) -> Vec<TaskDump> {
        let mut dumps: Vec<TaskDump> = self
            .tasks
            .lock()
            .values()
            .map(|t| TaskDump {
                id: t.id().to_string(),
                task_type: t.task_type(),
                dh_type: t.param().dh_type,
                dh_id: t.param().dh_id.clone(),
                state: t.state(),
                steps: t.steps().to_vec(),
            })
            .collect();
        dumps.sort_by(|a, b| a.id.cmp(&b.id));
        dumps
    }

    pub fn save_enabled_device(&self, key: &str, param: TaskParam) {
        self.enabled.lock().insert(key.to_string(), param);
    }

    pub fn remove_enabled_device(&self, key: &str) {
        self.enabled.lock().remove(key);
    }

    pub fn get_enabled_devices(&self) -> HashMap<String, TaskParam> {
        self.enabled.lock().clone()
    }
}
