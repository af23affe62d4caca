use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::address::{
    Address, ProbeJob, ProbeResult, generate_jobs, local_part_problem, normalize_domain,
};
use crate::backend::MailboxBackend;
use crate::config::ValidatorConfig;
use crate::detector::CatchAllDetector;
use crate::error::{Result, ValidatorError};
use crate::interrupt::Interrupt;
use crate::output;
use crate::pool::{ProbeFn, ProbePool};
use crate::probe::MailboxProbe;

// Everything learned about one batch
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub domain: String,
    pub trusted: bool,
    pub results: Vec<ProbeResult>,
}

impl BatchReport {
    pub fn existing(&self) -> Vec<Address> {
        self.results
            .iter()
            .filter(|r| r.exists())
            .map(|r| r.address.clone())
            .collect()
    }
}

/// Entry point of the engine: gate on the catch-all check, then fan out probes.
pub struct Validator {
    backend: Arc<dyn MailboxBackend>,
    config: ValidatorConfig,
    interrupt: Interrupt,
    show_progress: bool,
}

impl Validator {
    pub fn new(backend: Arc<dyn MailboxBackend>, config: ValidatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            interrupt: Interrupt::never(),
            show_progress: false,
        })
    }

    // Observe this interrupt while waiting on probes
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    // Draw a progress bar during address batches (ignored in verbose mode)
    pub fn with_progress_bar(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Whether `domain` has a reachable mail server whose answers can be trusted.
    ///
    /// Re-probes on every call; nothing is cached.
    pub async fn validate_server(&self, domain: &str) -> Result<bool> {
        let domain = checked_domain(domain)?;
        let trusted = CatchAllDetector::new(&self.backend, &self.config)
            .server_is_trustworthy(&domain, &self.interrupt)
            .await?;
        info!(domain = %domain, trusted, "Server validation finished");
        Ok(trusted)
    }

    /// Addresses `local@domain` the server confirmed. Empty when the server is not trusted.
    pub async fn validate_addresses(&self, local_parts: &[String], domain: &str) -> Result<Vec<Address>> {
        Ok(self.validate_addresses_detailed(local_parts, domain).await?.existing())
    }

    // Same as `validate_addresses`, keeping every individual result
    pub async fn validate_addresses_detailed(
        &self,
        local_parts: &[String],
        domain: &str,
    ) -> Result<BatchReport> {
        let domain = checked_domain(domain)?;
        checked_local_parts(local_parts)?;
        if !self.validate_server(&domain).await? {
            return Ok(BatchReport {
                domain,
                trusted: false,
                results: Vec::new(),
            });
        }

        let jobs = generate_jobs(local_parts, &domain, self.config.verbose);
        debug!(domain = %domain, jobs = jobs.len(), "Probing candidate addresses");

        let progress = self.progress_bar(jobs.len() as u64);
        let probe_fn = with_progress(
            MailboxProbe::job_fn(Arc::clone(&self.backend), self.config.probe_timeout),
            &progress,
        );

        let pool = ProbePool::new(self.config.workers, self.config.global_deadline);
        let outcomes = pool.run_all(jobs, probe_fn, &self.interrupt).await;
        progress.finish_and_clear();

        let mut results = Vec::new();
        for outcome in outcomes? {
            results.push(outcome.settle(self.config.transport_error_policy)?);
        }
        Ok(BatchReport {
            domain,
            trusted: true,
            results,
        })
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress || self.config.verbose {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("#>-"));
        pb.set_style(style);
        pb
    }
}

fn checked_domain(domain: &str) -> Result<String> {
    let domain = normalize_domain(domain);
    if domain.is_empty() || domain.contains('@') || domain.contains(char::is_whitespace) {
        return Err(ValidatorError::Config(format!("invalid domain: {domain:?}")));
    }
    Ok(domain)
}

// The whole batch is refused before any network traffic if one entry is unsafe
fn checked_local_parts(local_parts: &[String]) -> Result<()> {
    for local in local_parts {
        if let Some(problem) = local_part_problem(local) {
            return Err(ValidatorError::Config(format!(
                "invalid local part {local:?}: {problem}"
            )));
        }
    }
    Ok(())
}

// Tick the bar and print confirmed addresses above it as each probe finishes
fn with_progress(inner: ProbeFn, progress: &ProgressBar) -> ProbeFn {
    let progress = progress.clone();
    Arc::new(move |job: ProbeJob| {
        let fut = inner(job);
        let progress = progress.clone();
        async move {
            let result = fut.await;
            if let Ok(found) = &result {
                if found.exists() && !progress.is_hidden() {
                    progress.println(output::format_found(found));
                }
            }
            progress.inc(1);
            result
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_checks() {
        assert_eq!(checked_domain("@Example.com").unwrap(), "example.com");
        assert!(checked_domain("").is_err());
        assert!(checked_domain("a@b.com").is_err());
        assert!(checked_domain("exa mple.com").is_err());
    }

    #[test]
    fn unsafe_local_parts_refuse_the_batch() {
        let ok = vec!["alice".to_string(), "bob.smith".to_string()];
        assert!(checked_local_parts(&ok).is_ok());

        let injected = vec!["alice".to_string(), "x>\r\nDATA\r\nRCPT TO:<y".to_string()];
        assert!(matches!(
            checked_local_parts(&injected),
            Err(ValidatorError::Config(msg)) if msg.contains("local part")
        ));
    }

    #[test]
    fn report_lists_only_existing_addresses() {
        use crate::address::Verdict;
        let report = BatchReport {
            domain: "example.com".to_string(),
            trusted: true,
            results: vec![
                ProbeResult::new(Address::new("alice", "example.com"), Verdict::Exists, 1),
                ProbeResult::new(Address::new("bob", "example.com"), Verdict::DoesNotExist, 1),
                ProbeResult::new(Address::new("carol", "example.com"), Verdict::TimedOut, 1),
            ],
        };
        assert_eq!(report.existing(), vec![Address::new("alice", "example.com")]);
    }
}
