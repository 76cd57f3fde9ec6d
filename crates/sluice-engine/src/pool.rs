//! Bounded worker pools.
//!
//! Each stage owns one pool: a fixed number of worker tasks draining one
//! bounded queue. Capacity bounds concurrency, the queue bounds backlog, and
//! a full queue is backpressure for the submitter, never a drop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use sluice_events::Stage;
use sluice_telemetry::Metrics;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Unit of work executed by a pool worker. The job owns its own timeout and
/// settlement; the pool only provides bounded concurrency.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Error returned when a bounded queue cannot take another job right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Cloneable submission handle for one pool's queue.
#[derive(Clone)]
pub struct PoolHandle {
    stage: Stage,
    queue_depth: usize,
    tx: mpsc::Sender<Job>,
    metrics: Metrics,
}

impl PoolHandle {
    /// Stage this handle submits to.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Non-blocking submission. A full queue surfaces [`QueueFull`] so the
    /// caller can skip the tick instead of dropping work.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when the queue has no free slot or the pool has
    /// shut down.
    pub fn try_submit(&self, job: Job) -> Result<(), QueueFull> {
        let result = self.tx.try_send(job).map_err(|_| QueueFull);
        self.update_queue_gauge();
        result
    }

    /// Blocking submission used for in-pipeline chaining; awaiting here is
    /// the intended backpressure.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] only when the pool has shut down.
    pub async fn submit(&self, job: Job) -> Result<(), QueueFull> {
        let result = self.tx.send(job).await.map_err(|_| QueueFull);
        self.update_queue_gauge();
        result
    }

    fn update_queue_gauge(&self) {
        let queued = self.queue_depth.saturating_sub(self.tx.capacity());
        #[allow(clippy::cast_possible_wrap)]
        self.metrics
            .set_queue_depth(self.stage.as_str(), queued as i64);
    }
}

/// A fixed-width worker pool draining one bounded queue.
pub struct WorkerPool {
    stage: Stage,
    handle: PoolHandle,
    workers: Vec<JoinHandle<()>>,
    metrics: Metrics,
}

impl WorkerPool {
    /// Spawn `capacity` workers for `stage` over a queue of `queue_depth`.
    ///
    /// Workers stop accepting new jobs when `cancel` fires; a job already
    /// running is allowed to settle.
    #[must_use]
    pub fn new(
        stage: Stage,
        capacity: usize,
        queue_depth: usize,
        metrics: Metrics,
        cancel: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_depth);
        let rx = Arc::new(Mutex::new(rx));
        let in_flight = Arc::new(AtomicI64::new(0));

        let mut workers = Vec::with_capacity(capacity);
        for worker_index in 0..capacity {
            let rx = Arc::clone(&rx);
            let in_flight = Arc::clone(&in_flight);
            let metrics = metrics.clone();
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            () = cancel.cancelled() => None,
                            job = guard.recv() => job,
                        }
                    };
                    let Some(job) = job else {
                        debug!(stage = stage.as_str(), worker = worker_index, "worker stopping");
                        break;
                    };

                    let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    metrics.set_in_flight(stage.as_str(), running);
                    job.await;
                    let running = in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                    metrics.set_in_flight(stage.as_str(), running);
                }
            }));
        }

        info!(
            stage = stage.as_str(),
            capacity, queue_depth, "worker pool started"
        );
        Self {
            stage,
            handle: PoolHandle {
                stage,
                queue_depth,
                tx,
                metrics: metrics.clone(),
            },
            workers,
            metrics,
        }
    }

    /// Stage this pool serves.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// A cloneable submission handle.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Wait for workers to settle, aborting any that outlive `deadline`.
    ///
    /// Callers cancel the shared token first; this only joins.
    pub async fn shutdown(self, deadline: Duration) {
        drop(self.handle);
        for mut worker in self.workers {
            match timeout(deadline, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(stage = self.stage.as_str(), error = %err, "worker join failed");
                }
                Err(_elapsed) => {
                    warn!(
                        stage = self.stage.as_str(),
                        "worker exceeded the drain deadline; aborting"
                    );
                    worker.abort();
                }
            }
        }
        self.metrics.set_in_flight(self.stage.as_str(), 0);
        self.metrics.set_queue_depth(self.stage.as_str(), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    const DRAIN: Duration = Duration::from_secs(5);

    fn job(counter: Arc<AtomicUsize>, hold: Duration) -> Job {
        Box::pin(async move {
            sleep(hold).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn pool_runs_submitted_jobs() -> Result<(), Box<dyn Error>> {
        let cancel = CancellationToken::new();
        let metrics = Metrics::new()?;
        let pool = WorkerPool::new(Stage::Download, 3, 10, metrics, &cancel);
        let handle = pool.handle();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            handle
                .try_submit(job(Arc::clone(&counter), Duration::from_millis(5)))
                .map_err(|_| "queue full")?;
        }
        sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        drop(handle);
        pool.shutdown(DRAIN).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        Ok(())
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_capacity() -> Result<(), Box<dyn Error>> {
        let cancel = CancellationToken::new();
        let metrics = Metrics::new()?;
        let pool = WorkerPool::new(Stage::Convert, 2, 32, metrics, &cancel);
        let handle = pool.handle();

        let live = Arc::new(AtomicI64::new(0));
        let peak = Arc::new(AtomicI64::new(0));
        for _ in 0..12 {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            handle
                .try_submit(Box::pin(async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                }))
                .map_err(|_| "queue full")?;
        }
        sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        drop(handle);
        pool.shutdown(DRAIN).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        Ok(())
    }

    #[tokio::test]
    async fn full_queue_is_backpressure_not_a_drop() -> Result<(), Box<dyn Error>> {
        let cancel = CancellationToken::new();
        let metrics = Metrics::new()?;
        let pool = WorkerPool::new(Stage::Extract, 1, 1, metrics, &cancel);
        let handle = pool.handle();

        // One job occupies the worker, one fills the queue slot.
        let gate = Arc::new(tokio::sync::Notify::new());
        let release = Arc::clone(&gate);
        handle
            .try_submit(Box::pin(async move {
                release.notified().await;
            }))
            .map_err(|_| "queue full")?;
        sleep(Duration::from_millis(20)).await;
        handle
            .try_submit(Box::pin(async {}))
            .map_err(|_| "queue full")?;

        assert_eq!(handle.try_submit(Box::pin(async {})), Err(QueueFull));
        gate.notify_one();
        sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        drop(handle);
        pool.shutdown(DRAIN).await;
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_stops_idle_workers() -> Result<(), Box<dyn Error>> {
        let cancel = CancellationToken::new();
        let metrics = Metrics::new()?;
        let pool = WorkerPool::new(Stage::Download, 2, 4, metrics, &cancel);

        cancel.cancel();
        timeout(Duration::from_secs(1), pool.shutdown(DRAIN)).await?;
        Ok(())
    }
}
