//! Bounded worker pool with an explicit backpressure strategy.
//!
//! A pool admits at most `workers` running tasks plus `queue_depth` tasks
//! waiting for a worker. What happens to a submission beyond that is decided
//! by [`Backpressure`].

use serde::Deserialize;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Wait until a worker or queue slot frees up.
    BlockUntilCapacity,
    /// Run the task on the submitter.
    #[default]
    RunInline,
    /// Discard the task and count it.
    DropAndCount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_depth: usize,
    #[serde(default)]
    pub backpressure: Backpressure,
}

impl PoolSettings {
    pub fn new(workers: usize, queue_depth: usize, backpressure: Backpressure) -> Self {
        Self {
            workers,
            queue_depth,
            backpressure,
        }
    }
}

struct PoolInner {
    name: String,
    workers: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    backpressure: Backpressure,
    ran_inline: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

/// How a submission was admitted.
pub enum Submitted<T> {
    Spawned(JoinHandle<T>),
    Inline(T),
    Dropped,
}

impl<T> Submitted<T> {
    /// Waits for the task. `None` when it was dropped or panicked.
    pub async fn join(self) -> Option<T> {
        match self {
            Submitted::Spawned(handle) => match handle.await {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!("Pool task failed: {}", e);
                    None
                }
            },
            Submitted::Inline(value) => Some(value),
            Submitted::Dropped => None,
        }
    }
}

impl TaskPool {
    pub fn new(name: &str, settings: &PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.to_string(),
                workers: Arc::new(Semaphore::new(settings.workers.max(1))),
                queue: Arc::new(Semaphore::new(settings.queue_depth)),
                backpressure: settings.backpressure,
                ran_inline: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub async fn submit<F, T>(&self, task: F) -> Submitted<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if let Ok(permit) = self.inner.workers.clone().try_acquire_owned() {
            return Submitted::Spawned(spawn_with_worker(permit, task));
        }
        if let Ok(slot) = self.inner.queue.clone().try_acquire_owned() {
            return Submitted::Spawned(self.spawn_queued(slot, task));
        }

        match self.inner.backpressure {
            Backpressure::RunInline => {
                self.inner.ran_inline.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Pool {} saturated, running task inline", self.inner.name);
                Submitted::Inline(task.await)
            }
            Backpressure::DropAndCount => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Pool {} saturated, dropping task", self.inner.name);
                Submitted::Dropped
            }
            Backpressure::BlockUntilCapacity => {
                let workers = self.inner.workers.clone();
                let queue = self.inner.queue.clone();
                tokio::select! {
                    Ok(permit) = workers.acquire_owned() => {
                        Submitted::Spawned(spawn_with_worker(permit, task))
                    }
                    Ok(slot) = queue.acquire_owned() => {
                        Submitted::Spawned(self.spawn_queued(slot, task))
                    }
                    else => Submitted::Inline(task.await),
                }
            }
        }
    }

    fn spawn_queued<F, T>(&self, slot: OwnedSemaphorePermit, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let workers = self.inner.workers.clone();
        tokio::spawn(async move {
            let permit = workers.acquire_owned().await;
            drop(slot);
            let result = task.await;
            drop(permit);
            result
        })
    }

    pub fn ran_inline(&self) -> u64 {
        self.inner.ran_inline.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

fn spawn_with_worker<F, T>(permit: OwnedSemaphorePermit, task: F) -> JoinHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(async move {
        let result = task.await;
        drop(permit);
        result
    })
}
