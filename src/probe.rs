use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

use crate::address::{ProbeJob, ProbeResult, Verdict};
use crate::backend::MailboxBackend;
use crate::error::ProbeError;
use crate::output;
use crate::pool::ProbeFn;

// Single-address existence check
pub struct MailboxProbe;

impl MailboxProbe {
    /// Ask the backend whether `job.address` exists, bounded by `probe_timeout`.
    ///
    /// Timeouts never fail the caller: they come back as [`Verdict::TimedOut`].
    /// Any other backend failure is returned as [`ProbeError::Transport`].
    pub async fn probe(
        backend: &dyn MailboxBackend,
        job: &ProbeJob,
        probe_timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        let start_time = Instant::now();
        let outcome = match timeout(probe_timeout, backend.mailbox_exists(&job.address)).await {
            Ok(inner) => inner,
            Err(_elapsed) => Err(ProbeError::Timeout),
        };
        let elapsed = start_time.elapsed().as_millis();

        match outcome {
            Ok(exists) => {
                let result = ProbeResult::new(job.address.clone(), Verdict::from_exists(exists), elapsed);
                if job.verbose {
                    output::print_probe_verdict(&result);
                }
                Ok(result)
            }
            Err(ProbeError::Timeout) => {
                debug!(address = %job.address, elapsed_ms = elapsed as u64, "Probe timed out");
                let result = ProbeResult::new(job.address.clone(), Verdict::TimedOut, elapsed);
                if job.verbose {
                    output::print_probe_verdict(&result);
                }
                Ok(result)
            }
            Err(err) => Err(err),
        }
    }

    // Wrap `probe` as a pool job function sharing one backend
    pub fn job_fn(backend: Arc<dyn MailboxBackend>, probe_timeout: Duration) -> ProbeFn {
        Arc::new(move |job: ProbeJob| {
            let backend = Arc::clone(&backend);
            async move { Self::probe(backend.as_ref(), &job, probe_timeout).await }.boxed()
        })
    }
}
