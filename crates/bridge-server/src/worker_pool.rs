//! Fixed-size worker pool with a bounded task queue. Tasks are boxed async
//! closures; a panic inside one is caught and turned into an `internal: ..`
//! response rather than taking the worker down, following the panic-
//! isolation shape of a handler task that spawns each unit of work and
//! treats its `JoinError` as a recoverable failure.

use bridge_proto::{BridgeError, ResponseEnvelope};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type BoxedTask = Pin<Box<dyn Future<Output = ResponseEnvelope> + Send>>;

struct Submission {
    task: BoxedTask,
    reply: oneshot::Sender<ResponseEnvelope>,
}

/// Handle used by dispatchers to hand work to the pool. Cloning is cheap;
/// every clone shares the same bounded channel and worker set.
#[derive(Clone)]
pub struct WorkerPool {
    sender: mpsc::Sender<Submission>,
    task_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `worker_count` workers pulling from a channel bounded at
    /// `queue_size`. Each task runs under `task_timeout`; a task that
    /// outruns it is answered with `BridgeError::Timeout` and left running
    /// detached (the underlying I/O is expected to be cancel-safe via its
    /// own `tokio::time::timeout` wrapping, as the executors do).
    pub fn spawn(worker_count: usize, queue_size: usize, task_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for worker_id in 0..worker_count {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let submission = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some(submission) = submission else {
                        tracing::info!(worker_id, "worker shutting down: submission channel closed");
                        break;
                    };
                    run_submission(worker_id, submission, task_timeout).await;
                }
            });
        }

        Self { sender, task_timeout }
    }

    /// Submits `task`, returning its eventual response. Non-blocking:
    /// returns `QueueFull` immediately if the bounded channel is at
    /// capacity rather than waiting for room.
    pub async fn submit(&self, task: BoxedTask) -> ResponseEnvelope {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.sender.try_send(Submission { task, reply: reply_tx }).is_err() {
            return ResponseEnvelope::err(BridgeError::QueueFull.to_string());
        }
        match reply_rx.await {
            Ok(resp) => resp,
            Err(_) => ResponseEnvelope::err(BridgeError::Internal("worker dropped without replying".to_string()).to_string()),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }
}

async fn run_submission(worker_id: usize, submission: Submission, task_timeout: Duration) {
    let Submission { task, reply } = submission;

    let join = tokio::spawn(async move {
        match tokio::time::timeout(task_timeout, task).await {
            Ok(resp) => resp,
            Err(_) => ResponseEnvelope::err(BridgeError::Timeout.to_string()),
        }
    });

    let resp = match join.await {
        Ok(resp) => resp,
        Err(panic) => {
            tracing::error!(worker_id, "worker task panicked: {panic}");
            ResponseEnvelope::err(BridgeError::Internal(panic.to_string()).to_string())
        }
    };

    let _ = reply.send(resp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_proto::CellValue;

    #[tokio::test]
    async fn submitted_task_returns_its_result() {
        let pool = WorkerPool::spawn(2, 8, Duration::from_secs(5));
        let resp = pool
            .submit(Box::pin(async { ResponseEnvelope::single_column("n", vec![CellValue::Integer(1)]) }))
            .await;
        assert_eq!(resp.rows, vec![vec![CellValue::Integer(1)]]);
    }

    #[tokio::test]
    async fn panicking_task_yields_internal_error_not_a_dead_worker() {
        let pool = WorkerPool::spawn(1, 8, Duration::from_secs(5));
        let resp = pool.submit(Box::pin(async { panic!("boom") })).await;
        assert!(resp.is_error());
        assert!(resp.error.contains("internal"));

        // The worker is still alive afterward.
        let resp2 = pool
            .submit(Box::pin(async { ResponseEnvelope::single_column("n", vec![CellValue::Integer(2)]) }))
            .await;
        assert_eq!(resp2.rows, vec![vec![CellValue::Integer(2)]]);
    }

    #[tokio::test]
    async fn slow_task_times_out() {
        let pool = WorkerPool::spawn(1, 8, Duration::from_millis(10));
        let resp = pool
            .submit(Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                ResponseEnvelope::single_column("n", vec![CellValue::Integer(1)])
            }))
            .await;
        assert!(resp.is_error());
        assert!(resp.error.contains("timed out"));
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let pool = WorkerPool::spawn(0, 1, Duration::from_secs(5));
        // Fill the one slot with a task nobody is consuming (no workers).
        let _ = pool
            .sender
            .try_send(Submission {
                task: Box::pin(async { ResponseEnvelope::err("never runs") }),
                reply: oneshot::channel().0,
            });
        let resp = pool.submit(Box::pin(async { ResponseEnvelope::err("never runs either") })).await;
        assert!(resp.error.contains("queue is full"));
    }
}
