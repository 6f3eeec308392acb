//! Task objects and the shared environment task bodies run against
//!
//! Tasks form a DAG by id: a child stores its father's id and the father
//! stores its children's ids. The [`TaskBoard`] owns the objects.

use meshware_core::{TaskParam, TaskState, TaskStep, TaskType};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::capability_info_manager::CapabilityInfoManager;
use crate::component_manager::ComponentManager;
use crate::context::DhContext;
use crate::task_board::TaskBoard;
use crate::task_executor::{TaskDispatcher, TaskExecutor};
use crate::version_info_manager::VersionInfoManager;
use crate::{disable_task, enable_task, offline_task, online_task};

pub struct Task {
    id: String,
    task_type: TaskType,
    param: TaskParam,
    steps: Vec<TaskStep>,
    state: Mutex<TaskState>,
    father_id: Option<String>,
    children: Mutex<Vec<String>>,
    unfinished_children: Mutex<HashSet<String>>,
    children_changed: Notify,
}

impl Task {
    pub(crate) fn new(
        id: String,
        task_type: TaskType,
        param: TaskParam,
        steps: Vec<TaskStep>,
        father_id: Option<String>,
    ) -> Self {
        Self {
            id,
            task_type,
            param,
            steps,
            state: Mutex::new(TaskState::Init),
            father_id,
            children: Mutex::new(Vec::new()),
            unfinished_children: Mutex::new(HashSet::new()),
            children_changed: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn param(&self) -> &TaskParam {
        &self.param
    }

    pub fn steps(&self) -> &[TaskStep] {
        &self.steps
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Move the state forward; backwards moves are ignored
    pub fn set_state(&self, next: TaskState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            warn!(
                "Task {} rejected state change {} -> {}",
                self.id,
                state.label(),
                next.label()
            );
            return false;
        }
        *state = next;
        true
    }

    pub fn father_id(&self) -> Option<&str> {
        self.father_id.as_deref()
    }

    pub fn child_ids(&self) -> Vec<String> {
        self.children.lock().clone()
    }

    pub(crate) fn add_child(&self, child_id: &str) {
        self.children.lock().push(child_id.to_string());
        self.unfinished_children.lock().insert(child_id.to_string());
    }

    /// Record that a child reached its terminal state
    pub fn on_child_finished(&self, child_id: &str) {
        debug!("Task {} child {} finished", self.id, child_id);
        self.unfinished_children.lock().remove(child_id);
        self.children_changed.notify_waiters();
    }

    pub fn unfinished_children(&self) -> usize {
        self.unfinished_children.lock().len()
    }

    /// Block until every child has reported back
    pub async fn wait_children_finished(&self) {
        loop {
            let notified = self.children_changed.notified();
            if self.unfinished_children.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("state", &self.state())
            .field("father_id", &self.father_id)
            .finish()
    }
}

/// Services task bodies use
pub struct TaskEnv {
    pub context: Arc<DhContext>,
    pub board: Arc<TaskBoard>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub executor: Arc<TaskExecutor>,
    pub components: Arc<ComponentManager>,
    pub capabilities: Arc<CapabilityInfoManager>,
    pub versions: Arc<VersionInfoManager>,
}

/// Run a task body to its terminal state
pub(crate) async fn run_task(task: Arc<Task>, env: Arc<TaskEnv>) {
    debug!("Run task {} ({})", task.id(), task.task_type().label());
    match task.task_type() {
        TaskType::Enable => enable_task::run(&task, &env).await,
        TaskType::Disable => disable_task::run(&task, &env).await,
        TaskType::OnLine => online_task::run(&task, &env).await,
        TaskType::OffLine => offline_task::run(&task, &env).await,
        TaskType::Unknown => {
            warn!("Task {} has unknown type", task.id());
            task.set_state(TaskState::Fail);
        }
    }
    finish(&task, &env);
}

/// Fail a task that will never run
pub(crate) fn abandon_task(task: &Task, env: &TaskEnv) {
    warn!("Abandon queued task {}", task.id());
    task.set_state(TaskState::Fail);
    finish(task, env);
}

/// Report to the father, then leave the board; leaving is always last
fn finish(task: &Task, env: &TaskEnv) {
    if !task.state().is_terminal() {
        task.set_state(TaskState::Fail);
    }
    if let Some(father) = task.father_id().and_then(|id| env.board.get_task(id)) {
        father.on_child_finished(task.id());
    }
    env.board.remove_task(task.id());
}
