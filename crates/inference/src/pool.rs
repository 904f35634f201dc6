use crate::error::InferenceError;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, mpsc},
    thread,
};
use tokio::sync::oneshot;

pub const DEFAULT_POOL_SIZE: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of OS threads for blocking work.
///
/// Jobs submitted while every worker is busy wait in the queue. The caller
/// awaits a oneshot, so the async runtime is free while the job runs.
/// Dropping the awaiting future does not stop a job that already started.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> anyhow::Result<Self> {
        if size == 0 {
            anyhow::bail!("Worker pool size must be at least 1");
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("inference-worker-{id}"))
                    .spawn(move || worker_loop(id, receiver))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(size, "Worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Run `f` on a worker thread and wait for its result.
    ///
    /// A panic inside `f` is caught and reported as [`InferenceError::Internal`].
    pub async fn execute<F, T>(&self, f: F) -> Result<T, InferenceError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(result);
        });

        self.sender
            .as_ref()
            .ok_or(InferenceError::PoolClosed)?
            .send(job)
            .map_err(|_| InferenceError::PoolClosed)?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(InferenceError::Internal(format!(
                "worker panicked: {}",
                panic_message(payload.as_ref())
            ))),
            Err(_) => Err(InferenceError::PoolClosed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue drains
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Worker thread terminated abnormally");
            }
        }
    }
}

fn worker_loop(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };

        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
    tracing::debug!(worker = id, "Worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
