use std::sync::Arc;
use tracing::{debug, info};

use crate::address::{Address, ProbeJob};
use crate::backend::MailboxBackend;
use crate::config::ValidatorConfig;
use crate::error::{ProbeError, Result, ValidatorError};
use crate::interrupt::Interrupt;
use crate::output;
use crate::pool::ProbePool;
use crate::probe::MailboxProbe;

/// Local parts no real mail server should accept.
pub const DECOY_LOCAL_PARTS: [&str; 7] = [
    "poo.thisisfake",
    "agh12345djfj",
    "zvngh99fla",
    "bogardcaof",
    "975489qyewof9y__esr78ye4847t____",
    "1234567wgjskxSNFJBGvje5___________SSSAJWNN",
    "foofoofoofoofoofoofooBLAHBLAHBLAHhahahah2742",
];

/// Local part of the synthetic address used to check that a domain has a mail server at all.
pub const REACHABILITY_LOCAL_PART: &str = "test";

// Decides whether a domain's "mailbox exists" answers can be believed
pub struct CatchAllDetector<'a> {
    backend: &'a Arc<dyn MailboxBackend>,
    config: &'a ValidatorConfig,
}

impl<'a> CatchAllDetector<'a> {
    pub fn new(backend: &'a Arc<dyn MailboxBackend>, config: &'a ValidatorConfig) -> Self {
        Self { backend, config }
    }

    pub fn decoy_addresses(domain: &str) -> Vec<Address> {
        DECOY_LOCAL_PARTS
            .iter()
            .map(|local| Address::new(*local, domain))
            .collect()
    }

    // Trusted only when a mail server answers and it rejects at least one decoy
    pub async fn server_is_trustworthy(&self, domain: &str, interrupt: &Interrupt) -> Result<bool> {
        let verbose = self.config.verbose;

        if !self.has_mail_server(domain, interrupt).await? {
            if verbose {
                output::print_status(&format!("Cannot detect mail server at \"{domain}\""), false);
            }
            return Ok(false);
        }

        if verbose {
            output::print_status(
                "Ensuring mail server does not state every email address exists",
                true,
            );
        }

        let jobs: Vec<ProbeJob> = Self::decoy_addresses(domain)
            .into_iter()
            .map(|address| ProbeJob::new(address, verbose))
            .collect();
        let decoy_count = jobs.len();

        let pool = ProbePool::new(self.config.workers, self.config.global_deadline);
        let outcomes = pool
            .run_all(
                jobs,
                MailboxProbe::job_fn(Arc::clone(self.backend), self.config.probe_timeout),
                interrupt,
            )
            .await?;

        let mut accepted = 0usize;
        for outcome in outcomes {
            if outcome.settle(self.config.transport_error_policy)?.exists() {
                accepted += 1;
            }
        }
        debug!(domain, accepted, decoys = decoy_count, "Decoy probes finished");

        if accepted == decoy_count {
            info!(domain, "Mail server claims every decoy exists, treating as catch-all");
            if verbose {
                output::print_status(
                    &format!(
                        "Mail server at {domain} said all fake dummy addresses exist, cannot use it for validating addresses"
                    ),
                    false,
                );
            }
            return Ok(false);
        }
        Ok(true)
    }

    // Any failure to reach the exchanger counts as "no mail server"
    async fn has_mail_server(&self, domain: &str, interrupt: &Interrupt) -> Result<bool> {
        let probe = Address::new(REACHABILITY_LOCAL_PART, domain);
        let check = tokio::select! {
            biased;
            () = interrupt.triggered() => return Err(ValidatorError::Interrupted),
            res = tokio::time::timeout(self.config.probe_timeout, self.backend.has_mail_exchange(&probe)) => {
                res.unwrap_or(Err(ProbeError::Timeout))
            }
        };

        match check {
            Ok(reachable) => Ok(reachable),
            Err(e) => {
                info!(%probe, "Mail exchange check failed: {e}");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoy_set_is_seven_distinct_local_parts() {
        let mut locals = DECOY_LOCAL_PARTS.to_vec();
        locals.sort_unstable();
        locals.dedup();
        assert_eq!(locals.len(), 7);
    }

    #[test]
    fn decoys_are_built_at_the_domain() {
        let decoys = CatchAllDetector::decoy_addresses("example.com");
        assert_eq!(decoys.len(), DECOY_LOCAL_PARTS.len());
        assert!(decoys.iter().all(|a| a.domain() == "example.com"));
        assert_eq!(decoys[1].email(), "agh12345djfj@example.com");
    }
}
