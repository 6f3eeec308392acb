//! Bounded task queue and its consumer
//!
//! A dedicated consumer pops tasks and posts their launch onto the event
//! bus, so tasks start in push order. Task bodies then run concurrently;
//! Enable and Disable bodies hold a worker permit while they run.

use meshware_core::{EventBus, TaskParam, TaskState, TaskType};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{FwkError, Result};
use crate::task::{abandon_task, run_task, Task, TaskEnv};
use crate::task_board::TaskBoard;
use crate::task_factory::TaskFactory;

pub struct TaskExecutor {
    tx: mpsc::Sender<Arc<Task>>,
    board: Arc<TaskBoard>,
    workers: Arc<Semaphore>,
    stop: Arc<Notify>,
    bus: Arc<EventBus>,
}

impl TaskExecutor {
    pub fn new(
        capacity: usize,
        max_workers: usize,
        board: Arc<TaskBoard>,
        bus: Arc<EventBus>,
    ) -> (Self, mpsc::Receiver<Arc<Task>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let executor = Self {
            tx,
            board,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            stop: Arc::new(Notify::new()),
            bus,
        };
        (executor, rx)
    }

    /// Queue a task; a task that cannot be queued is failed and taken off the board
    pub fn push_task(&self, task: Arc<Task>) -> Result<()> {
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                error!("Task queue full, dropping task {}", task.id());
                task.set_state(TaskState::Fail);
                self.board.remove_task(task.id());
                Err(FwkError::QueueFull)
            }
            Err(TrySendError::Closed(task)) => {
                error!("Task queue closed, dropping task {}", task.id());
                task.set_state(TaskState::Fail);
                self.board.remove_task(task.id());
                Err(FwkError::NotInitialized)
            }
        }
    }

    /// Spawn the queue consumer
    pub fn start(&self, mut rx: mpsc::Receiver<Arc<Task>>, env: Arc<TaskEnv>) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            info!("Task executor started");
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    next = rx.recv() => match next {
                        Some(task) => {
                            debug!("Launch task {}", task.id());
                            let env = env.clone();
                            bus.post(async move {
                                tokio::spawn(run_task(task, env));
                            });
                        }
                        None => break,
                    },
                }
            }
            rx.close();
            while let Ok(task) = rx.try_recv() {
                abandon_task(&task, &env);
            }
            info!("Task executor stopped");
        })
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Worker permit for a leaf task body
    pub(crate) async fn acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        self.workers.clone().acquire_owned().await.ok()
    }
}

/// Create-and-push in one call
pub struct TaskDispatcher {
    factory: TaskFactory,
    executor: Arc<TaskExecutor>,
}

impl TaskDispatcher {
    pub fn new(factory: TaskFactory, executor: Arc<TaskExecutor>) -> Self {
        Self { factory, executor }
    }

    pub fn dispatch(
        &self,
        task_type: TaskType,
        param: TaskParam,
        father: Option<&Arc<Task>>,
    ) -> Result<Arc<Task>> {
        let task = self.factory.create_task(task_type, param, father)?;
        if let Err(e) = self.executor.push_task(task.clone()) {
            if let Some(father) = father {
                father.on_child_finished(task.id());
            }
            return Err(e);
        }
        Ok(task)
    }
}
