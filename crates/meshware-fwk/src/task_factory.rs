//! Builds typed tasks and registers them on the board

use meshware_core::{anonymize, TaskParam, TaskStep, TaskType};
use std::sync::Arc;
use tracing::info;

use crate::error::{FwkError, Result};
use crate::task::Task;
use crate::task_board::TaskBoard;

pub struct TaskFactory {
    board: Arc<TaskBoard>,
}

impl TaskFactory {
    pub fn new(board: Arc<TaskBoard>) -> Self {
        Self { board }
    }

    fn steps_of(task_type: TaskType) -> Vec<TaskStep> {
        match task_type {
            TaskType::Enable => vec![TaskStep::DoEnable],
            TaskType::Disable => vec![TaskStep::DoDisable],
            TaskType::OnLine => vec![
                TaskStep::SyncOnlineInfo,
                TaskStep::RegisterOnlineDistributedHardware,
            ],
            TaskType::OffLine => vec![
                TaskStep::UnregisterOfflineDistributedHardware,
                TaskStep::WaitUnregistgerComplete,
                TaskStep::ClearOfflineInfo,
            ],
            TaskType::Unknown => vec![],
        }
    }

    /// Create a task, link it under `father` and put it on the board
    pub fn create_task(
        &self,
        task_type: TaskType,
        param: TaskParam,
        father: Option<&Arc<Task>>,
    ) -> Result<Arc<Task>> {
        if task_type == TaskType::Unknown {
            return Err(FwkError::ParamInvalid("unknown task type".to_string()));
        }
        let id = format!("Task_{}", uuid::Uuid::new_v4());
        info!(
            "Create task {} ({}), networkId: {}, dhId: {}",
            id,
            task_type.label(),
            anonymize(&param.network_id),
            anonymize(&param.dh_id)
        );
        let task = Arc::new(Task::new(
            id,
            task_type,
            param,
            Self::steps_of(task_type),
            father.map(|f| f.id().to_string()),
        ));
        self.register(task.clone(), father)?;
        Ok(task)
    }

    /// A child is linked only once the board has accepted it
    fn register(&self, task: Arc<Task>, father: Option<&Arc<Task>>) -> Result<()> {
        self.board.add_task(task.clone())?;
        if let Some(father) = father {
            father.add_child(task.id());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshware_core::{DhType, EventBus, TaskState};

    #[tokio::test]
    async fn test_created_task_is_on_board_once() {
        let board = Arc::new(TaskBoard::new(EventBus::start()));
        let factory = TaskFactory::new(board.clone());

        let param = TaskParam {
            network_id: "net".to_string(),
            uuid: "uuid".to_string(),
            dh_id: "camera_0".to_string(),
            dh_type: DhType::Camera,
        };
        let task = factory.create_task(TaskType::Enable, param, None).unwrap();
        assert!(task.id().starts_with("Task_"));
        assert_eq!(task.state(), TaskState::Init);
        assert_eq!(board.task_count(), 1);
        assert!(Arc::ptr_eq(&board.get_task(task.id()).unwrap(), &task));

        board.remove_task(task.id());
        assert!(board.get_task(task.id()).is_none());
    }

    #[tokio::test]
    async fn test_father_child_linkage() {
        let board = Arc::new(TaskBoard::new(EventBus::start()));
        let factory = TaskFactory::new(board.clone());

        let father = factory
            .create_task(TaskType::OffLine, TaskParam::for_device("net", "uuid"), None)
            .unwrap();
        assert_eq!(father.steps().len(), 3);

        let child = factory
            .create_task(TaskType::Disable, TaskParam::for_device("net", "uuid"), Some(&father))
            .unwrap();
        assert_eq!(child.father_id(), Some(father.id()));
        assert_eq!(father.child_ids(), vec![child.id().to_string()]);
        assert_eq!(father.unfinished_children(), 1);
    }

    #[tokio::test]
    async fn test_rejected_child_not_linked() {
        let board = Arc::new(TaskBoard::new(EventBus::start()));
        let factory = TaskFactory::new(board.clone());

        let father = factory
            .create_task(TaskType::OffLine, TaskParam::for_device("net", "uuid"), None)
            .unwrap();
        let child = factory
            .create_task(TaskType::Disable, TaskParam::for_device("net", "uuid"), Some(&father))
            .unwrap();

        let duplicate = Arc::new(Task::new(
            child.id().to_string(),
            TaskType::Disable,
            TaskParam::for_device("net", "uuid"),
            vec![TaskStep::DoDisable],
            Some(father.id().to_string()),
        ));
        assert!(matches!(
            factory.register(duplicate, Some(&father)),
            Err(FwkError::RepeatTaskId(_))
        ));
        assert_eq!(father.child_ids(), vec![child.id().to_string()]);

        father.on_child_finished(child.id());
        assert_eq!(father.unfinished_children(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let board = Arc::new(TaskBoard::new(EventBus::start()));
        let factory = TaskFactory::new(board.clone());
        assert!(matches!(
            factory.create_task(TaskType::Unknown, TaskParam::default(), None),
            Err(FwkError::ParamInvalid(_))
        ));
        assert_eq!(board.task_count(), 0);
    }
}
