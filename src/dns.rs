use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::system_conf::read_system_conf;

use crate::error::ProbeError;

// Resolves the mail exchangers of a domain, best preference first
#[derive(Clone)]
pub struct MxResolver {
    resolver: TokioAsyncResolver,
}

impl MxResolver {
    // Use the system resolver configuration, falling back to public defaults
    pub fn new(timeout: Duration) -> Self {
        let (config, opts) = resolver_settings(read_system_conf(), timeout);
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    pub async fn mail_exchangers(&self, domain: &str) -> Result<Vec<String>, ProbeError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(mx) => {
                let records: Vec<(u16, String)> = mx
                    .iter()
                    .map(|r| (r.preference(), r.exchange().to_utf8()))
                    .collect();
                let hosts = order_exchangers(records);
                debug!(domain, ?hosts, "Resolved mail exchangers");
                Ok(hosts)
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                ResolveErrorKind::Timeout => Err(ProbeError::Timeout),
                _ => Err(ProbeError::Transport(format!("MX lookup for {domain} failed: {e}"))),
            },
        }
    }
}

// Per-query timeout applies whether or not the system configuration could be read
fn resolver_settings<E: Display>(
    system: Result<(ResolverConfig, ResolverOpts), E>,
    timeout: Duration,
) -> (ResolverConfig, ResolverOpts) {
    let (config, mut opts) = system.unwrap_or_else(|e| {
        warn!("Could not read system DNS configuration ({e}), using defaults");
        (ResolverConfig::default(), ResolverOpts::default())
    });
    opts.timeout = timeout;
    (config, opts)
}

// Sort by preference (lower is better) and drop null MX records ("."), which mean "no mail"
fn order_exchangers(mut records: Vec<(u16, String)>) -> Vec<String> {
    records.sort_by_key(|(pref, _)| *pref);
    records
        .into_iter()
        .map(|(_, host)| host.trim_end_matches('.').to_string())
        .filter(|host| !host.is_empty())
        .collect()
}
