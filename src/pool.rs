use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::address::{Address, ProbeJob, ProbeResult, Verdict};
use crate::config::TransportErrorPolicy;
use crate::error::{ProbeError, Result, ValidatorError};
use crate::interrupt::Interrupt;

/// Work executed by a pool worker for one job.
pub type ProbeFn =
    Arc<dyn Fn(ProbeJob) -> BoxFuture<'static, std::result::Result<ProbeResult, ProbeError>> + Send + Sync>;

// What happened to one job. Correlated by address, never by position.
#[derive(Debug)]
pub struct JobOutcome {
    pub address: Address,
    pub result: std::result::Result<ProbeResult, ProbeError>,
}

impl JobOutcome {
    // Apply the transport-error policy, yielding a final result for this address
    pub fn settle(self, policy: TransportErrorPolicy) -> Result<ProbeResult> {
        match (self.result, policy) {
            (Ok(result), _) => Ok(result),
            (Err(ProbeError::Timeout), _) => Ok(ProbeResult::new(self.address, Verdict::TimedOut, 0)),
            (Err(ProbeError::Transport(message)), TransportErrorPolicy::Degrade) => {
                warn!(address = %self.address, "Probe failed, counting as non-existent: {message}");
                Ok(ProbeResult::new(self.address, Verdict::DoesNotExist, 0).with_reason(message))
            }
            (Err(ProbeError::Transport(message)), TransportErrorPolicy::Abort) => {
                Err(ValidatorError::ProbeTransport {
                    address: self.address.email(),
                    message,
                })
            }
        }
    }
}

/// A bounded group of probe workers for a single batch.
///
/// `run_all` consumes the pool, so every batch gets fresh workers and none
/// outlive the call. Workers never see the operator interrupt: only the
/// coordinator watches it, and stops the workers through a pool-owned signal.
#[derive(Debug, Clone)]
pub struct ProbePool {
    workers: usize,
    deadline: Duration,
}

impl ProbePool {
    pub fn new(workers: usize, deadline: Duration) -> Self {
        Self {
            workers: workers.max(1),
            deadline,
        }
    }

    pub async fn run_all(
        self,
        jobs: Vec<ProbeJob>,
        probe_fn: ProbeFn,
        interrupt: &Interrupt,
    ) -> Result<Vec<JobOutcome>> {
        if interrupt.is_triggered() {
            return Err(ValidatorError::Interrupted);
        }
        let total = jobs.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let worker_count = self.workers.min(total);
        let started = Instant::now();
        debug!(jobs = total, workers = worker_count, "Starting probe pool");

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<JobOutcome>();
        let group = WorkerGroup::spawn(worker_count, &queue, &probe_fn, &results_tx);
        // Only workers hold senders now; the channel closes when the last one exits
        drop(results_tx);

        let collect = async {
            let mut outcomes = Vec::with_capacity(total);
            while let Some(outcome) = results_rx.recv().await {
                outcomes.push(outcome);
            }
            outcomes
        };

        let waited = tokio::select! {
            biased;
            () = interrupt.triggered() => Err(ValidatorError::Interrupted),
            () = tokio::time::sleep(self.deadline) => Err(ValidatorError::DeadlineExceeded { deadline: self.deadline }),
            outcomes = collect => Ok(outcomes),
        };

        match waited {
            Ok(outcomes) => {
                group.join().await?;
                debug!(
                    completed = outcomes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Probe pool finished"
                );
                Ok(outcomes)
            }
            Err(err) => {
                warn!("Stopping probe workers: {err}");
                group.terminate().await;
                Err(err)
            }
        }
    }
}

// Owns the worker tasks. Dropping it aborts any that are still running.
struct WorkerGroup {
    handles: Vec<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
}

impl WorkerGroup {
    fn spawn(
        count: usize,
        queue: &Arc<Mutex<VecDeque<ProbeJob>>>,
        probe_fn: &ProbeFn,
        results_tx: &mpsc::UnboundedSender<JobOutcome>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handles = (0..count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(queue),
                    Arc::clone(probe_fn),
                    results_tx.clone(),
                    stop_rx.clone(),
                ))
            })
            .collect();
        Self { handles, stop_tx }
    }

    // Wait for workers that drained the queue. Surfaces panics.
    async fn join(mut self) -> Result<()> {
        let mut failure = None;
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    failure = Some(ValidatorError::WorkerPanic(e.to_string()));
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    // Stop every worker mid-job and wait until they are gone
    async fn terminate(mut self) {
        self.stop_tx.send_replace(true);
        let handles = std::mem::take(&mut self.handles);
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            // Cancelled JoinErrors are expected here
            let _ = handle.await;
        }
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.stop_tx.send_replace(true);
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<Mutex<VecDeque<ProbeJob>>>,
    probe_fn: ProbeFn,
    results_tx: mpsc::UnboundedSender<JobOutcome>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let stopped = *stop_rx.borrow();
        if stopped {
            break;
        }
        let job = queue.lock().await.pop_front();
        let Some(job) = job else {
            break;
        };
        let address = job.address.clone();
        let result = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            result = probe_fn(job) => result,
        };
        if results_tx.send(JobOutcome { address, result }).is_err() {
            break;
        }
    }
    debug!(worker = id, "Probe worker exiting");
}
