//! Task queue abstraction
//!
//! The dispatcher hands work to a `TaskQueue` as named task messages. The
//! engine is registered as the handler of `RUN_JOB_TASK`. In a deployment the
//! orchestrator's pending results are the queue and runners claim from it;
//! `LocalTaskQueue` runs everything in-process on a bounded worker pool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Task name the engine is registered under
pub const RUN_JOB_TASK: &str = "sluice.run_job";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task: String,
    pub queue: String,
    pub job_result_id: Uuid,
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no handler registered for task '{0}'")]
    UnknownTask(String),

    #[error("queue '{0}' is not served")]
    UnknownQueue(String),

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("queue is closed")]
    Closed,

    #[error("queue backend error: {0}")]
    Backend(String),
}

/// Handle to an enqueued task
///
/// Remote queues cannot report completion; `wait` then returns immediately.
#[derive(Debug)]
pub struct TaskHandle {
    pub job_result_id: Uuid,
    done: Option<oneshot::Receiver<Result<(), String>>>,
}

impl TaskHandle {
    /// A handle for a task executed elsewhere
    pub fn detached(job_result_id: Uuid) -> Self {
        Self {
            job_result_id,
            done: None,
        }
    }

    /// Wait for the task to finish
    pub async fn wait(self) -> Result<(), QueueError> {
        match self.done {
            None => Ok(()),
            Some(rx) => match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(message)) => Err(QueueError::TaskFailed(message)),
                Err(_) => Err(QueueError::Closed),
            },
        }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, message: TaskMessage) -> Result<TaskHandle, QueueError>;
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, message: TaskMessage) -> Result<(), String>;
}

// =============================================================================
// Local queue
// =============================================================================

struct Envelope {
    message: TaskMessage,
    done: oneshot::Sender<Result<(), String>>,
}

/// In-process queue served by a bounded pool of tokio tasks
pub struct LocalTaskQueue {
    queues: Vec<String>,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

impl LocalTaskQueue {
    /// A queue serving the named task queues
    pub fn new(queues: Vec<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            queues,
            handlers: RwLock::new(HashMap::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn register_task(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), handler);
    }

    fn handler(&self, task: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task)
            .cloned()
    }

    /// Start the worker pool; at most `concurrency` tasks run at once
    ///
    /// Returns `None` if the pool was already started.
    pub fn start(self: &Arc<Self>, concurrency: usize) -> Option<JoinHandle<()>> {
        let mut receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let queue = Arc::clone(self);
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        Some(tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let Some(handler) = queue.handler(&envelope.message.task) else {
                    let _ = envelope
                        .done
                        .send(Err(format!("no handler for '{}'", envelope.message.task)));
                    continue;
                };

                tokio::spawn(async move {
                    let _permit = permit;
                    let id = envelope.message.job_result_id;
                    debug!("Running task {} for {}", envelope.message.task, id);
                    let outcome = handler.handle(envelope.message).await;
                    if let Err(e) = &outcome {
                        error!("Task for {} failed: {}", id, e);
                    }
                    if envelope.done.send(outcome).is_err() {
                        debug!("Nobody waits for task {}", id);
                    }
                });
            }
            warn!("Local task queue closed");
        }))
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, message: TaskMessage) -> Result<TaskHandle, QueueError> {
        if self.handler(&message.task).is_none() {
            return Err(QueueError::UnknownTask(message.task));
        }
        if !self.queues.contains(&message.queue) {
            return Err(QueueError::UnknownQueue(message.queue));
        }

        let (done, rx) = oneshot::channel();
        let job_result_id = message.job_result_id;
        self.sender
            .send(Envelope { message, done })
            .map_err(|_| QueueError::Closed)?;

        Ok(TaskHandle {
            job_result_id,
            done: Some(rx),
        })
    }
}
