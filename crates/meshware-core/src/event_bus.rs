//! In-process event bus
//!
//! The bus has two halves:
//! - a broadcast channel of [`BusEvent`]s for decoupled pub/sub
//! - a single consumer loop executing posted jobs one at a time in FIFO
//!   post order, so work posted from callbacks never races other posted work

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crate::device::DhType;
use crate::task::{TaskState, TaskType};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

const EVENT_CAPACITY: usize = 256;

/// Events published on the bus
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A peer device joined the mesh
    DeviceOnline { network_id: String, uuid: String },
    /// A peer device left the mesh
    DeviceOffline { network_id: String, uuid: String },
    /// A store partition was re-opened after its process died and must be resynced
    StoreRecovered { store_id: String },
    /// A task was registered on the board
    TaskCreated { id: String, task_type: TaskType },
    /// A task reached a terminal state and left the board
    TaskFinished { id: String, task_type: TaskType, state: TaskState },
    /// A remote component was enabled on this device
    ComponentEnabled { network_id: String, dh_type: DhType, dh_id: String },
    /// A remote component was disabled on this device
    ComponentDisabled { network_id: String, dh_type: DhType, dh_id: String },
    /// A component type was restarted after its system ability died
    ComponentRecovered { dh_type: DhType },
}

/// Pub/sub plus serialized job executor
pub struct EventBus {
    jobs: mpsc::UnboundedSender<Job>,
    events: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create the bus and spawn its consumer loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start() -> Arc<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            debug!("Event bus loop stopped");
        });

        Arc::new(Self { jobs, events })
    }

    /// Post a job to run after every previously posted job
    pub fn post<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.jobs.send(Box::pin(job)).is_err() {
            debug!("Event bus loop gone, dropping posted job");
        }
    }

    /// Post a job once `delay` has elapsed
    pub fn post_delayed<F>(&self, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = jobs.send(Box::pin(job));
        });
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: BusEvent) {
        trace!(?event, "Publishing bus event");
        let _ = self.events.send(event);
    }

    /// Subscribe to published events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_posted_jobs_run_in_fifo_order() {
        let bus = EventBus::start();
        let recorder = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10u32 {
            let r = recorder.clone();
            bus.post(async move {
                if i % 3 == 0 {
                    tokio::task::yield_now().await;
                }
                r.lock().unwrap().push(i);
            });
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        bus.post(async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();

        assert_eq!(*recorder.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_delayed_job_runs() {
        let bus = EventBus::start();
        let (tx, rx) = tokio::sync::oneshot::channel();
        bus.post_delayed(Duration::from_millis(20), async move {
            let _ = tx.send(42u32);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::start();
        let mut rx = bus.subscribe();
        bus.publish(BusEvent::StoreRecovered {
            store_id: "dh_capability".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            BusEvent::StoreRecovered {
                store_id: "dh_capability".to_string()
            }
        );
    }
}
